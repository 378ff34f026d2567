//! provgraph core
//!
//! Records a provenance graph of data, calculation and code nodes joined by
//! labeled links, and answers ancestry queries from a materialized transitive
//! closure instead of walking the graph at read time.
//!
//! - [`NodeStore`]: node identity, type tag, building/finalized lifecycle,
//!   version counter
//! - [`AttributeStore`]: typed per-node metadata with internal-key freezing
//! - [`LinkManager`]: direct edges, closure eligibility, acyclicity
//! - [`ClosureIndex`]: the closure table, maintained on every link change
//! - [`TypeRegistry`]: type tag to behavior resolution with total fallback
//!
//! # Quick Start
//!
//! ```rust
//! use provgraph_core::prelude::*;
//!
//! let graph = ProvenanceGraph::new(GraphConfig::default());
//! let owner = OwnerRef::new("alice");
//! let structure = graph.nodes().create("data.structure", "si", "", owner.clone());
//! let calc = graph.nodes().create("calculation.pw", "scf", "", owner.clone());
//! let output = graph.nodes().create("data.structure", "relaxed", "", owner);
//!
//! graph.links().add_link(structure, calc, "in")?;
//! graph.links().add_link(calc, output, "out")?;
//!
//! assert_eq!(graph.closure().distance(structure, output), Some(2));
//! graph.attributes().set(calc, "_state", "finished")?;
//! graph.nodes().finalize(calc)?;
//! # Ok::<(), GraphError>(())
//! ```

pub mod attribute;
pub mod closure;
pub mod comment;
pub mod config;
pub mod error;
pub mod group;
pub mod harness;
pub mod link;
pub mod logging;
pub mod node;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod value;

pub use attribute::AttributeStore;
pub use closure::{ClosureIndex, RemovalSummary};
pub use comment::CommentLog;
pub use config::{GraphConfig, RemovalStrategy};
pub use error::{GraphError, GraphResult, Missing};
pub use group::GroupStore;
pub use link::LinkManager;
pub use node::NodeStore;
pub use registry::{BaseBehavior, Behavior, PluginLookup, PluginTable, TypeRegistry};
pub use snapshot::Snapshot;
pub use store::{GraphStats, ProvenanceGraph, ResolvedNode};
pub use types::*;
pub use value::{AttributeRecord, AttributeValue, DataType, StoredValue};

/// Common imports for graph callers
pub mod prelude {
    pub use crate::config::{GraphConfig, RemovalStrategy};
    pub use crate::error::{GraphError, GraphResult};
    pub use crate::registry::{Behavior, PluginTable, TypeRegistry};
    pub use crate::store::ProvenanceGraph;
    pub use crate::types::{Category, LinkId, NodeId, NodeState, OwnerRef};
    pub use crate::value::AttributeValue;
}
