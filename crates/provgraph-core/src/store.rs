//! Shared graph state
//!
//! All record sets live in one [`Tables`] value behind a `parking_lot`
//! reader/writer lock. A write guard is the transaction boundary: every
//! mutating operation validates first, then applies all of its changes
//! before releasing the guard, so no partial update is ever observable.

use crate::attribute::AttributeStore;
use crate::closure::{ClosureIndex, ClosureTable};
use crate::comment::CommentLog;
use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::group::GroupStore;
use crate::link::LinkManager;
use crate::node::NodeStore;
use crate::registry::{Behavior, TypeRegistry};
use crate::types::{Comment, CommentId, Group, GroupId, Link, LinkId, Node, NodeId};
use crate::value::AttributeRecord;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// In-memory record sets plus their secondary indexes
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) uuids: HashMap<Uuid, NodeId>,
    pub(crate) links: BTreeMap<LinkId, Link>,
    pub(crate) outgoing: HashMap<NodeId, BTreeSet<LinkId>>,
    pub(crate) incoming: HashMap<NodeId, BTreeSet<LinkId>>,
    pub(crate) closure: ClosureTable,
    pub(crate) attributes: HashMap<NodeId, BTreeMap<String, AttributeRecord>>,
    pub(crate) groups: BTreeMap<GroupId, Group>,
    pub(crate) group_names: HashMap<String, GroupId>,
    pub(crate) comments: BTreeMap<CommentId, Comment>,
    pub(crate) next_node: u64,
    pub(crate) next_link: u64,
    pub(crate) next_group: u64,
    pub(crate) next_comment: u64,
    /// Bumped on every committed link-table change
    pub(crate) link_epoch: u64,
}

impl Tables {
    pub(crate) fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes.get(&id).ok_or(GraphError::node_not_found(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or(GraphError::node_not_found(id))
    }

    pub(crate) fn insert_node(&mut self, node: Node) {
        self.next_node = self.next_node.max(node.id.0 + 1);
        self.uuids.insert(node.uuid, node.id);
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn insert_link(&mut self, link: Link) {
        self.next_link = self.next_link.max(link.id.0 + 1);
        self.outgoing.entry(link.source).or_default().insert(link.id);
        self.incoming.entry(link.target).or_default().insert(link.id);
        self.links.insert(link.id, link);
    }

    pub(crate) fn remove_link_record(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&link.source) {
            out.remove(&id);
        }
        if let Some(inc) = self.incoming.get_mut(&link.target) {
            inc.remove(&id);
        }
        Some(link)
    }

    pub(crate) fn insert_group(&mut self, group: Group) {
        self.next_group = self.next_group.max(group.id.0 + 1);
        self.group_names.insert(group.name.clone(), group.id);
        self.groups.insert(group.id, group);
    }

    pub(crate) fn insert_comment(&mut self, comment: Comment) {
        self.next_comment = self.next_comment.max(comment.id.0 + 1);
        self.comments.insert(comment.id, comment);
    }
}

/// Record counts for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct GraphStats {
    /// Nodes in any state
    pub nodes: usize,
    /// Nodes past finalization
    pub finalized_nodes: usize,
    /// Stored links
    pub links: usize,
    /// Links that feed the closure
    pub eligible_links: usize,
    /// Materialized closure rows
    pub closure_rows: usize,
    /// Attribute rows across all nodes
    pub attributes: usize,
    /// Named groups
    pub groups: usize,
    /// Comments across all nodes
    pub comments: usize,
}

/// A node paired with the behavior its type tag resolves to
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    /// Node record at resolution time
    pub node: Node,
    /// Behavior its type tag resolved to
    pub behavior: Arc<dyn Behavior>,
}

/// The provenance graph: shared state plus the component views over it
///
/// Construct once and share (e.g. behind an `Arc`); every component view is a
/// cheap borrow.
///
/// # Example
/// ```rust
/// use provgraph_core::{GraphConfig, OwnerRef, ProvenanceGraph};
///
/// let graph = ProvenanceGraph::new(GraphConfig::default());
/// let owner = OwnerRef::new("alice");
/// let input = graph.nodes().create("data.structure", "in", "", owner.clone());
/// let calc = graph.nodes().create("calculation.pw", "run", "", owner);
/// graph.links().add_link(input, calc, "structure").unwrap();
///
/// assert!(graph.closure().query_ancestors(calc).unwrap().contains(&input));
/// ```
#[derive(Debug)]
pub struct ProvenanceGraph {
    config: GraphConfig,
    registry: TypeRegistry,
    pub(crate) tables: RwLock<Tables>,
}

impl ProvenanceGraph {
    /// Create an empty graph with an empty plugin table
    #[must_use]
    pub fn new(config: GraphConfig) -> Self {
        Self::with_registry(config, TypeRegistry::default())
    }

    /// Create an empty graph resolving behaviors through `registry`
    #[must_use]
    pub fn with_registry(config: GraphConfig, registry: TypeRegistry) -> Self {
        Self::from_tables(config, registry, Tables::default())
    }

    pub(crate) fn from_tables(config: GraphConfig, registry: TypeRegistry, tables: Tables) -> Self {
        Self {
            config,
            registry,
            tables: RwLock::new(tables),
        }
    }

    /// Configuration the graph was opened with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Type registry used by [`resolve_node`](Self::resolve_node)
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Node identity and lifecycle
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> NodeStore<'_> {
        NodeStore::new(self)
    }

    /// Per-node typed metadata
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> AttributeStore<'_> {
        AttributeStore::new(self)
    }

    /// Direct edges and closure maintenance
    #[inline]
    #[must_use]
    pub fn links(&self) -> LinkManager<'_> {
        LinkManager::new(self)
    }

    /// Ancestry and descendance queries
    #[inline]
    #[must_use]
    pub fn closure(&self) -> ClosureIndex<'_> {
        ClosureIndex::new(self)
    }

    /// Named node sets
    #[inline]
    #[must_use]
    pub fn groups(&self) -> GroupStore<'_> {
        GroupStore::new(self)
    }

    /// Free-text notes on nodes
    #[inline]
    #[must_use]
    pub fn comments(&self) -> CommentLog<'_> {
        CommentLog::new(self)
    }

    /// Load a node together with its resolved behavior
    ///
    /// # Errors
    /// `NotFound` if the node does not exist. Resolution itself never fails.
    pub fn resolve_node(&self, id: NodeId) -> GraphResult<ResolvedNode> {
        let node = self.nodes().get(id)?;
        let behavior = self.registry.resolve_for(&node.type_tag, Some(node.uuid));
        Ok(ResolvedNode { node, behavior })
    }

    /// Attributes the node's behavior requires but the node lacks
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn missing_attributes(&self, id: NodeId) -> GraphResult<Vec<String>> {
        let resolved = self.resolve_node(id)?;
        let tables = self.tables.read();
        let present = tables.attributes.get(&id);
        Ok(resolved
            .behavior
            .required_attributes()
            .iter()
            .filter(|key| present.map_or(true, |attrs| !attrs.contains_key(**key)))
            .map(|key| (*key).to_string())
            .collect())
    }

    /// Record counts
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let tables = self.tables.read();
        GraphStats {
            nodes: tables.nodes.len(),
            finalized_nodes: tables.nodes.values().filter(|n| n.is_finalized()).count(),
            links: tables.links.len(),
            eligible_links: tables.links.values().filter(|l| l.eligible).count(),
            closure_rows: tables.closure.len(),
            attributes: tables.attributes.values().map(BTreeMap::len).sum(),
            groups: tables.groups.len(),
            comments: tables.comments.len(),
        }
    }
}

impl Default for ProvenanceGraph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}
