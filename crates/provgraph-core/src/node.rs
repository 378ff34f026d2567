//! Node identity and lifecycle

use crate::error::{GraphError, GraphResult, Missing};
use crate::store::{ProvenanceGraph, Tables};
use crate::types::{Node, NodeId, NodeState, OwnerRef};
use chrono::Utc;
use uuid::Uuid;

impl Tables {
    /// Fetch-and-increment under the caller's write guard
    pub(crate) fn bump_version(&mut self, id: NodeId) -> GraphResult<u64> {
        let node = self.node_mut(id)?;
        node.version += 1;
        Ok(node.version)
    }
}

/// Node store view over a [`ProvenanceGraph`]
#[derive(Debug, Clone, Copy)]
pub struct NodeStore<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> NodeStore<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// Allocate a node in the building state with version 1
    ///
    /// Type tags and labels carry no uniqueness constraint.
    pub fn create(
        &self,
        type_tag: &str,
        label: &str,
        description: &str,
        owner: OwnerRef,
    ) -> NodeId {
        let mut tables = self.graph.tables.write();
        let mut uuid = Uuid::new_v4();
        while tables.uuids.contains_key(&uuid) {
            uuid = Uuid::new_v4();
        }
        let id = NodeId(tables.next_node);
        tables.insert_node(Node {
            id,
            uuid,
            type_tag: type_tag.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            owner,
            state: NodeState::Building,
            version: 1,
            sync_version: 0,
        });
        tracing::debug!(node = %id, %uuid, type_tag, "node created");
        id
    }

    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn get(&self, id: NodeId) -> GraphResult<Node> {
        self.graph.tables.read().node(id).cloned()
    }

    /// Look a node up by its uuid
    ///
    /// # Errors
    /// `NotFound` if no node carries the uuid
    pub fn by_uuid(&self, uuid: Uuid) -> GraphResult<Node> {
        let tables = self.graph.tables.read();
        let id = tables
            .uuids
            .get(&uuid)
            .ok_or(GraphError::NotFound(Missing::Uuid(uuid)))?;
        tables.node(*id).cloned()
    }

    /// Move a node from building to finalized
    ///
    /// The state check and the transition happen under one write guard, so
    /// of several concurrent callers exactly one succeeds.
    ///
    /// # Errors
    /// `NotFound` for an unknown node, `InvalidState` if already finalized
    pub fn finalize(&self, id: NodeId) -> GraphResult<u64> {
        let mut tables = self.graph.tables.write();
        let node = tables.node_mut(id)?;
        if node.state != NodeState::Building {
            return Err(GraphError::InvalidState {
                node: id,
                state: node.state,
                operation: "finalize",
            });
        }
        node.state = NodeState::Finalized;
        node.version += 1;
        let version = node.version;
        tracing::debug!(node = %id, version, "node finalized");
        Ok(version)
    }

    /// Replace the label; allowed in any state
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn set_label(&self, id: NodeId, label: &str) -> GraphResult<u64> {
        let mut tables = self.graph.tables.write();
        let node = tables.node_mut(id)?;
        node.label = label.to_string();
        node.version += 1;
        Ok(node.version)
    }

    /// Replace the description; allowed in any state
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn set_description(&self, id: NodeId, description: &str) -> GraphResult<u64> {
        let mut tables = self.graph.tables.write();
        let node = tables.node_mut(id)?;
        node.description = description.to_string();
        node.version += 1;
        Ok(node.version)
    }

    /// Record that the current version was pushed to an external replica
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn mark_synced(&self, id: NodeId) -> GraphResult<u64> {
        let mut tables = self.graph.tables.write();
        let node = tables.node_mut(id)?;
        node.sync_version = node.version;
        Ok(node.sync_version)
    }

    /// Whether the node changed since it was last synchronized
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn needs_sync(&self, id: NodeId) -> GraphResult<bool> {
        let tables = self.graph.tables.read();
        let node = tables.node(id)?;
        Ok(node.sync_version < node.version)
    }

    /// Nodes whose type tag starts with `prefix`, ordered by id
    ///
    /// The prefix must end on a segment boundary: `data` matches
    /// `data.structure` but not `datastore.x`.
    #[must_use]
    pub fn nodes_by_type(&self, prefix: &str) -> Vec<Node> {
        let tables = self.graph.tables.read();
        tables
            .nodes
            .values()
            .filter(|node| matches_type_prefix(&node.type_tag, prefix))
            .cloned()
            .collect()
    }

    /// All node ids in allocation order
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        self.graph.tables.read().nodes.keys().copied().collect()
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.tables.read().nodes.len()
    }

    /// Whether the graph has no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches_type_prefix(tag: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match tag.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || prefix.ends_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerRef {
        OwnerRef::new("tester")
    }

    #[test]
    fn create_starts_building_at_version_one() {
        let graph = ProvenanceGraph::default();
        let id = graph.nodes().create("data.structure", "si", "bulk", owner());
        let node = graph.nodes().get(id).unwrap();
        assert_eq!(node.state, NodeState::Building);
        assert_eq!(node.version, 1);
        assert_eq!(node.sync_version, 0);
        assert_eq!(node.label, "si");
    }

    #[test]
    fn ids_are_sequential_and_uuids_unique() {
        let graph = ProvenanceGraph::default();
        let a = graph.nodes().create("data", "", "", owner());
        let b = graph.nodes().create("data", "", "", owner());
        assert_eq!(b.0, a.0 + 1);
        let ua = graph.nodes().get(a).unwrap().uuid;
        let ub = graph.nodes().get(b).unwrap().uuid;
        assert_ne!(ua, ub);
        assert_eq!(graph.nodes().by_uuid(ub).unwrap().id, b);
    }

    #[test]
    fn finalize_twice_is_invalid_state() {
        let graph = ProvenanceGraph::default();
        let id = graph.nodes().create("calculation.pw", "", "", owner());
        assert_eq!(graph.nodes().finalize(id).unwrap(), 2);
        let err = graph.nodes().finalize(id).unwrap_err();
        assert!(matches!(err, GraphError::InvalidState { .. }));
        assert_eq!(graph.nodes().get(id).unwrap().version, 2);
    }

    #[test]
    fn missing_node_is_not_found() {
        let graph = ProvenanceGraph::default();
        assert!(graph.nodes().get(NodeId(9)).unwrap_err().is_not_found());
        assert!(graph.nodes().finalize(NodeId(9)).unwrap_err().is_not_found());
        assert!(graph
            .nodes()
            .by_uuid(Uuid::new_v4())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn sync_bookkeeping() {
        let graph = ProvenanceGraph::default();
        let id = graph.nodes().create("data", "", "", owner());
        assert!(graph.nodes().needs_sync(id).unwrap());
        graph.nodes().mark_synced(id).unwrap();
        assert!(!graph.nodes().needs_sync(id).unwrap());
        graph.nodes().set_label(id, "renamed").unwrap();
        assert!(graph.nodes().needs_sync(id).unwrap());
    }

    #[test]
    fn label_and_description_change_after_finalize() {
        let graph = ProvenanceGraph::default();
        let id = graph.nodes().create("data", "a", "", owner());
        graph.nodes().finalize(id).unwrap();
        assert_eq!(graph.nodes().set_label(id, "b").unwrap(), 3);
        assert_eq!(graph.nodes().set_description(id, "d").unwrap(), 4);
        let node = graph.nodes().get(id).unwrap();
        assert_eq!((node.label.as_str(), node.description.as_str()), ("b", "d"));
    }

    #[test]
    fn type_prefix_respects_segments() {
        assert!(matches_type_prefix("data.structure", "data"));
        assert!(matches_type_prefix("data.structure", "data."));
        assert!(matches_type_prefix("data", "data"));
        assert!(!matches_type_prefix("datastore.x", "data"));
        assert!(matches_type_prefix("code.qe.pw", "code.qe"));
        assert!(matches_type_prefix("anything", ""));
    }

    #[test]
    fn nodes_by_type_filters() {
        let graph = ProvenanceGraph::default();
        graph.nodes().create("data.structure", "", "", owner());
        graph.nodes().create("datastore.x", "", "", owner());
        graph.nodes().create("calculation.pw", "", "", owner());
        let data = graph.nodes().nodes_by_type("data");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].type_tag, "data.structure");
    }
}
