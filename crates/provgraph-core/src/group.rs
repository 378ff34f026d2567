//! Named node sets

use crate::error::{GraphError, GraphResult, Missing};
use crate::store::ProvenanceGraph;
use crate::types::{Group, GroupId, NodeId, OwnerRef};
use chrono::Utc;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Group store view over a [`ProvenanceGraph`]
#[derive(Debug, Clone, Copy)]
pub struct GroupStore<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> GroupStore<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// # Errors
    /// `DuplicateKey` if a group with this name exists
    pub fn create_group(&self, name: &str, description: &str, owner: OwnerRef) -> GraphResult<GroupId> {
        let mut tables = self.graph.tables.write();
        if tables.group_names.contains_key(name) {
            return Err(GraphError::DuplicateKey(format!("group name '{name}'")));
        }
        let id = GroupId(tables.next_group);
        tables.insert_group(Group {
            id,
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            owner,
            created_at: Utc::now(),
            members: BTreeSet::new(),
        });
        tracing::debug!(group = %id, name, "group created");
        Ok(id)
    }

    /// # Errors
    /// `NotFound` for an unknown group name
    pub fn get(&self, name: &str) -> GraphResult<Group> {
        let tables = self.graph.tables.read();
        tables
            .group_names
            .get(name)
            .and_then(|id| tables.groups.get(id))
            .cloned()
            .ok_or_else(|| GraphError::NotFound(Missing::Group(name.to_string())))
    }

    /// Add a node; returns whether it was newly added
    ///
    /// # Errors
    /// `NotFound` for an unknown group or node
    pub fn add_to_group(&self, name: &str, node: NodeId) -> GraphResult<bool> {
        let mut tables = self.graph.tables.write();
        tables.node(node)?;
        let id = *tables
            .group_names
            .get(name)
            .ok_or_else(|| GraphError::NotFound(Missing::Group(name.to_string())))?;
        Ok(tables
            .groups
            .get_mut(&id)
            .is_some_and(|group| group.members.insert(node)))
    }

    /// Remove a node; returns whether it was a member
    ///
    /// # Errors
    /// `NotFound` for an unknown group
    pub fn remove_from_group(&self, name: &str, node: NodeId) -> GraphResult<bool> {
        let mut tables = self.graph.tables.write();
        let id = *tables
            .group_names
            .get(name)
            .ok_or_else(|| GraphError::NotFound(Missing::Group(name.to_string())))?;
        Ok(tables
            .groups
            .get_mut(&id)
            .is_some_and(|group| group.members.remove(&node)))
    }

    /// # Errors
    /// `NotFound` for an unknown group
    pub fn group_members(&self, name: &str) -> GraphResult<BTreeSet<NodeId>> {
        self.get(name).map(|group| group.members)
    }

    /// Names of the groups containing `node`, sorted
    #[must_use]
    pub fn groups_of(&self, node: NodeId) -> Vec<String> {
        let tables = self.graph.tables.read();
        let mut names: Vec<String> = tables
            .groups
            .values()
            .filter(|group| group.members.contains(&node))
            .map(|group| group.name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_names_are_unique() {
        let graph = ProvenanceGraph::default();
        graph.groups().create_group("relax", "", OwnerRef::new("u")).unwrap();
        let err = graph
            .groups()
            .create_group("relax", "again", OwnerRef::new("v"))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));
    }

    #[test]
    fn membership() {
        let graph = ProvenanceGraph::default();
        let n = graph.nodes().create("data", "", "", OwnerRef::new("u"));
        graph.groups().create_group("a", "", OwnerRef::new("u")).unwrap();
        graph.groups().create_group("b", "", OwnerRef::new("u")).unwrap();

        assert!(graph.groups().add_to_group("b", n).unwrap());
        assert!(graph.groups().add_to_group("a", n).unwrap());
        assert!(!graph.groups().add_to_group("a", n).unwrap());
        assert_eq!(graph.groups().groups_of(n), vec!["a", "b"]);

        assert!(graph.groups().remove_from_group("a", n).unwrap());
        assert!(graph.groups().group_members("a").unwrap().is_empty());
        assert!(graph.groups().add_to_group("missing", n).unwrap_err().is_not_found());
        assert!(graph.groups().add_to_group("a", NodeId(99)).unwrap_err().is_not_found());
    }

    #[test]
    fn membership_does_not_touch_node_version() {
        let graph = ProvenanceGraph::default();
        let n = graph.nodes().create("data", "", "", OwnerRef::new("u"));
        graph.groups().create_group("g", "", OwnerRef::new("u")).unwrap();
        graph.groups().add_to_group("g", n).unwrap();
        assert_eq!(graph.nodes().get(n).unwrap().version, 1);
    }
}
