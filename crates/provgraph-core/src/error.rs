//! Error types for the provenance graph core
//!
//! Structural violations ([`GraphError::CycleDetected`],
//! [`GraphError::ImmutableFieldViolation`], [`GraphError::UnserializableValue`])
//! are raised before anything is written. Type-resolution misses never show up
//! here: the registry degrades to a base behavior instead.

use crate::types::{LinkId, NodeId, NodeState};
use std::fmt;

/// Result alias used across the crate
pub type GraphResult<T> = Result<T, GraphError>;

/// The record a lookup failed to find
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    /// Node handle
    Node(NodeId),
    /// Node uuid
    Uuid(uuid::Uuid),
    /// Link handle
    Link(LinkId),
    /// Attribute key on a node
    Attribute {
        /// Owning node
        node: NodeId,
        /// Attribute key
        key: String,
    },
    /// Group name
    Group(String),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Node(id) => write!(f, "node {id}"),
            Missing::Uuid(uuid) => write!(f, "node with uuid {uuid}"),
            Missing::Link(id) => write!(f, "link {id}"),
            Missing::Attribute { node, key } => write!(f, "attribute '{key}' on node {node}"),
            Missing::Group(name) => write!(f, "group '{name}'"),
        }
    }
}

/// Main error type for graph operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Referenced record does not exist
    #[error("not found: {0}")]
    NotFound(Missing),

    /// Uuid, attribute key or group name collision
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Adding the edge would close a cycle over closure-eligible links
    #[error("cycle detected: {to} already reaches {from}")]
    CycleDetected {
        /// Source of the rejected link
        from: NodeId,
        /// Target of the rejected link
        to: NodeId,
    },

    /// Internal attribute rewritten after the node was finalized
    #[error("attribute '{key}' of finalized node {node} is immutable")]
    ImmutableFieldViolation {
        /// Finalized node
        node: NodeId,
        /// Internal key that was rewritten or deleted
        key: String,
    },

    /// Value cannot be represented as an attribute
    #[error("unserializable value: {0}")]
    UnserializableValue(String),

    /// Stored json text failed to parse back
    #[error("corrupt attribute '{key}' on node {node}: {reason}")]
    CorruptAttribute {
        /// Owning node
        node: NodeId,
        /// Attribute key
        key: String,
        /// Parser message
        reason: String,
    },

    /// Operation not allowed in the node's current lifecycle state
    #[error("node {node} is {state}, cannot {operation}")]
    InvalidState {
        /// Node the operation targeted
        node: NodeId,
        /// State the node was in
        state: NodeState,
        /// Rejected operation, e.g. `finalize`
        operation: &'static str,
    },

    /// Snapshot file could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or config could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot content violates a referential or closure invariant
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

impl GraphError {
    /// Shorthand for a missing node
    #[inline]
    #[must_use]
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NotFound(Missing::Node(id))
    }

    /// Shorthand for a missing link
    #[inline]
    #[must_use]
    pub fn link_not_found(id: LinkId) -> Self {
        Self::NotFound(Missing::Link(id))
    }

    /// Check if the error is a structural rejection (nothing was persisted)
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::ImmutableFieldViolation { .. }
                | Self::UnserializableValue(_)
        )
    }

    /// Check if the error is a failed lookup
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
