//! Core record types
//!
//! Nodes and links are addressed by opaque integer handles into flat tables;
//! no record owns another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

handle!(
    /// Node handle, allocated sequentially by the node store
    NodeId
);
handle!(
    /// Link handle; insertion order follows handle order
    LinkId
);
handle!(
    /// Closure row handle
    PathId
);
handle!(
    /// Group handle
    GroupId
);
handle!(
    /// Comment handle
    CommentId
);

/// Opaque owner reference supplied by the identity collaborator
///
/// Never validated or dereferenced by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerRef(pub String);

impl OwnerRef {
    /// Wrap an owner reference
    #[inline]
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Behavior family of a node, taken from the first segment of its type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Generic node (unknown or empty category)
    Node,
    /// Process that consumed inputs and produced outputs
    Calculation,
    /// Executable used by calculations; never feeds the closure
    Code,
    /// Input or output value of a calculation
    Data,
}

impl Category {
    /// Map a category segment to a known family
    ///
    /// Unknown segments return `None`; callers fall back to [`Category::Node`].
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "calculation" => Some(Category::Calculation),
            "code" => Some(Category::Code),
            "data" => Some(Category::Data),
            _ => None,
        }
    }

    /// Whether links between two nodes of this category feed the closure
    #[inline]
    #[must_use]
    pub fn feeds_closure(self) -> bool {
        matches!(self, Category::Calculation | Category::Data)
    }

    /// Lowercase name as it appears in type tags
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Node => "node",
            Category::Calculation => "calculation",
            Category::Code => "code",
            Category::Data => "data",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a hierarchical type tag on its first `.`
///
/// `"code.quantumespresso.pw"` yields `("code", "quantumespresso.pw")`;
/// a tag without a separator yields an empty subtype.
#[must_use]
pub fn split_type_tag(tag: &str) -> (&str, &str) {
    tag.split_once('.').unwrap_or((tag, ""))
}

/// Category of a type tag, [`Category::Node`] when unrecognized
#[must_use]
pub fn category_of(tag: &str) -> Category {
    Category::parse(split_type_tag(tag).0).unwrap_or(Category::Node)
}

/// Lifecycle state; finalization is one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Still being produced; all attributes writable
    Building,
    /// Sealed; existing internal attributes are frozen
    Finalized,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Building => f.write_str("building"),
            NodeState::Finalized => f.write_str("finalized"),
        }
    }
}

/// A graph vertex: data, calculation or code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Table handle
    pub id: NodeId,
    /// Globally unique identity
    pub uuid: Uuid,
    /// Hierarchical tag such as `data.structure` or `calculation.pw`
    pub type_tag: String,
    /// Short user label
    pub label: String,
    /// Free-form user description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Creating user
    pub owner: OwnerRef,
    /// Lifecycle state
    pub state: NodeState,
    /// Bumped on every attribute or content mutation; starts at 1
    pub version: u64,
    /// Last version pushed to an external replica; 0 = never synchronized
    pub sync_version: u64,
}

impl Node {
    /// Category derived from the type tag
    #[inline]
    #[must_use]
    pub fn category(&self) -> Category {
        category_of(&self.type_tag)
    }

    /// Whether the node has been finalized
    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state == NodeState::Finalized
    }
}

/// Direct labeled edge between two nodes; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Table handle; also insertion order
    pub id: LinkId,
    /// Upstream endpoint
    pub source: NodeId,
    /// Downstream endpoint
    pub target: NodeId,
    /// Role of the edge, e.g. `structure`
    pub label: String,
    /// Fixed at creation: both endpoints are calculation or data nodes
    pub eligible: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Materialized reachability fact `ancestor ->+ descendant`
///
/// Several rows may exist for one pair. Each row is keyed by its `pivot`,
/// the eligible link whose insertion produced it; `depth` is the length of
/// the path the row records, so the minimum over a pair's rows is the
/// distance between the two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosurePath {
    /// Row handle
    pub id: PathId,
    /// Upstream end of the pair
    pub ancestor: NodeId,
    /// Downstream end of the pair
    pub descendant: NodeId,
    /// Length of the recorded path, at least 1
    pub depth: u32,
    /// First edge of the recorded path
    pub entry_edge: LinkId,
    /// The single edge realizing the pair, only when `depth == 1`
    pub direct_edge: Option<LinkId>,
    /// Last edge of the recorded path
    pub exit_edge: LinkId,
    /// Eligible link whose insertion produced this row
    pub pivot: LinkId,
}

/// Named set of nodes; carries no closure or attribute semantics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Table handle
    pub id: GroupId,
    /// Globally unique identity
    pub uuid: Uuid,
    /// Unique name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Creating user
    pub owner: OwnerRef,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Member nodes
    pub members: std::collections::BTreeSet<NodeId>,
}

/// Free-text note attached to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Table handle; also insertion order
    pub id: CommentId,
    /// Annotated node
    pub node: NodeId,
    /// Author
    pub owner: OwnerRef,
    /// Comment text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
