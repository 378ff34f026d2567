//! Free-text notes attached to nodes
//!
//! Comments are annotations, not content: adding one never bumps the node's
//! version and is allowed on finalized nodes.

use crate::error::GraphResult;
use crate::store::ProvenanceGraph;
use crate::types::{Comment, CommentId, NodeId, OwnerRef};
use chrono::Utc;

/// Comment log view over a [`ProvenanceGraph`]
#[derive(Debug, Clone, Copy)]
pub struct CommentLog<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> CommentLog<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn add_comment(&self, node: NodeId, owner: OwnerRef, content: &str) -> GraphResult<CommentId> {
        let mut tables = self.graph.tables.write();
        tables.node(node)?;
        let id = CommentId(tables.next_comment);
        tables.insert_comment(Comment {
            id,
            node,
            owner,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Comments on `node`, oldest first
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn comments(&self, node: NodeId) -> GraphResult<Vec<Comment>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        Ok(tables
            .comments
            .values()
            .filter(|comment| comment.node == node)
            .cloned()
            .collect())
    }
}
