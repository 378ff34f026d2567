//! Per-node typed key/value metadata
//!
//! Keys carrying the configured internal prefix are producer-set: they may be
//! written freely while a node is building, and an existing internal key is
//! frozen once the node is finalized. Other keys stay mutable for the node's
//! whole lifetime.

use crate::error::{GraphError, GraphResult, Missing};
use crate::store::ProvenanceGraph;
use crate::types::NodeId;
use crate::value::{AttributeRecord, AttributeValue, StoredValue};
use chrono::Utc;
use serde::Serialize;

/// Attribute store view over a [`ProvenanceGraph`]
#[derive(Debug, Clone, Copy)]
pub struct AttributeStore<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> AttributeStore<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// Upsert `key` on `node`, replacing any prior value and datatype
    ///
    /// Returns the node's new version.
    ///
    /// # Errors
    /// - `UnserializableValue` if the value has no stored form
    /// - `NotFound` if the node does not exist
    /// - `ImmutableFieldViolation` when rewriting an internal key of a
    ///   finalized node
    pub fn set(&self, node: NodeId, key: &str, value: impl Into<AttributeValue>) -> GraphResult<u64> {
        let stored = StoredValue::encode(value.into())?;
        let internal = self.graph.config().is_internal_key(key);

        let mut tables = self.graph.tables.write();
        let finalized = tables.node(node)?.is_finalized();
        let attrs = tables.attributes.entry(node).or_default();
        if internal && finalized && attrs.contains_key(key) {
            return Err(GraphError::ImmutableFieldViolation {
                node,
                key: key.to_string(),
            });
        }
        let datatype = stored.datatype();
        attrs.insert(
            key.to_string(),
            AttributeRecord {
                node,
                key: key.to_string(),
                value: stored,
                updated_at: Utc::now(),
            },
        );
        let version = tables.bump_version(node)?;
        tracing::debug!(node = %node, key, %datatype, version, "attribute set");
        Ok(version)
    }

    /// Serialize any `serde` value and store it
    ///
    /// # Errors
    /// As [`set`](Self::set); serialization failures surface as
    /// `UnserializableValue`
    pub fn set_serialized<T: Serialize + ?Sized>(&self, node: NodeId, key: &str, value: &T) -> GraphResult<u64> {
        self.set(node, key, AttributeValue::from_serializable(value)?)
    }

    /// Read a value back with its original datatype
    ///
    /// # Errors
    /// `NotFound` for an unknown node or key, `CorruptAttribute` if stored
    /// json text no longer parses
    pub fn get(&self, node: NodeId, key: &str) -> GraphResult<AttributeValue> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        let record = tables
            .attributes
            .get(&node)
            .and_then(|attrs| attrs.get(key))
            .ok_or_else(|| {
                GraphError::NotFound(Missing::Attribute {
                    node,
                    key: key.to_string(),
                })
            })?;
        record.value.decode().map_err(|reason| GraphError::CorruptAttribute {
            node,
            key: key.to_string(),
            reason,
        })
    }

    /// Remove a key; returns the node's new version
    ///
    /// # Errors
    /// `NotFound` for an unknown node or key, `ImmutableFieldViolation` for
    /// an internal key of a finalized node
    pub fn delete(&self, node: NodeId, key: &str) -> GraphResult<u64> {
        let internal = self.graph.config().is_internal_key(key);
        let mut tables = self.graph.tables.write();
        let finalized = tables.node(node)?.is_finalized();
        let present = tables
            .attributes
            .get(&node)
            .is_some_and(|attrs| attrs.contains_key(key));
        if !present {
            return Err(GraphError::NotFound(Missing::Attribute {
                node,
                key: key.to_string(),
            }));
        }
        if internal && finalized {
            return Err(GraphError::ImmutableFieldViolation {
                node,
                key: key.to_string(),
            });
        }
        if let Some(attrs) = tables.attributes.get_mut(&node) {
            attrs.remove(key);
            if attrs.is_empty() {
                tables.attributes.remove(&node);
            }
        }
        let version = tables.bump_version(node)?;
        tracing::debug!(node = %node, key, version, "attribute deleted");
        Ok(version)
    }

    /// Every `(key, value)` pair on a node, sorted by key
    ///
    /// # Errors
    /// `NotFound` for an unknown node, `CorruptAttribute` on the first
    /// unparseable json value
    pub fn attributes(&self, node: NodeId) -> GraphResult<Vec<(String, AttributeValue)>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        let Some(attrs) = tables.attributes.get(&node) else {
            return Ok(Vec::new());
        };
        attrs
            .values()
            .map(|record| {
                record
                    .value
                    .decode()
                    .map(|value| (record.key.clone(), value))
                    .map_err(|reason| GraphError::CorruptAttribute {
                        node,
                        key: record.key.clone(),
                        reason,
                    })
            })
            .collect()
    }

    /// Raw stored record, including the datatype tag
    #[must_use]
    pub fn record(&self, node: NodeId, key: &str) -> Option<AttributeRecord> {
        self.graph
            .tables
            .read()
            .attributes
            .get(&node)
            .and_then(|attrs| attrs.get(key))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnerRef;
    use crate::value::DataType;
    use serde_json::json;

    fn graph_and_node() -> (ProvenanceGraph, NodeId) {
        let graph = ProvenanceGraph::default();
        let id = graph
            .nodes()
            .create("calculation.pw", "", "", OwnerRef::new("u"));
        (graph, id)
    }

    #[test]
    fn values_keep_their_datatype() {
        let (graph, n) = graph_and_node();
        let attrs = graph.attributes();
        attrs.set(n, "flag", true).unwrap();
        attrs.set(n, "count", 1).unwrap();
        attrs.set(n, "energy", 1.0).unwrap();
        attrs.set(n, "name", "si").unwrap();
        attrs.set(n, "kpoints", json!([4, 4, 4])).unwrap();

        assert_eq!(attrs.get(n, "flag").unwrap(), AttributeValue::Bool(true));
        assert_eq!(attrs.get(n, "count").unwrap(), AttributeValue::Int(1));
        assert_eq!(attrs.get(n, "energy").unwrap(), AttributeValue::Float(1.0));
        assert_eq!(attrs.get(n, "name").unwrap(), AttributeValue::Text("si".into()));
        assert_eq!(
            attrs.get(n, "kpoints").unwrap(),
            AttributeValue::Json(json!([4, 4, 4]))
        );
        assert_eq!(attrs.record(n, "count").unwrap().value.datatype(), DataType::Int);
    }

    #[test]
    fn upsert_replaces_datatype() {
        let (graph, n) = graph_and_node();
        graph.attributes().set(n, "x", 1).unwrap();
        graph.attributes().set(n, "x", "one").unwrap();
        assert_eq!(
            graph.attributes().get(n, "x").unwrap(),
            AttributeValue::Text("one".into())
        );
        assert_eq!(graph.attributes().attributes(n).unwrap().len(), 1);
    }

    #[test]
    fn internal_key_frozen_after_finalize() {
        let (graph, n) = graph_and_node();
        graph.attributes().set(n, "_state", "A").unwrap();
        graph.nodes().finalize(n).unwrap();
        let version = graph.nodes().get(n).unwrap().version;

        let err = graph.attributes().set(n, "_state", "B").unwrap_err();
        assert!(matches!(err, GraphError::ImmutableFieldViolation { .. }));
        assert_eq!(graph.nodes().get(n).unwrap().version, version);
        assert_eq!(
            graph.attributes().get(n, "_state").unwrap(),
            AttributeValue::Text("A".into())
        );

        graph.attributes().set(n, "note", "B").unwrap();
        assert!(graph.nodes().get(n).unwrap().version > version);
    }

    #[test]
    fn unserializable_value_changes_nothing() {
        let (graph, n) = graph_and_node();
        let err = graph.attributes().set(n, "bad", f64::NAN).unwrap_err();
        assert!(err.is_structural());
        assert_eq!(graph.nodes().get(n).unwrap().version, 1);
        assert!(graph.attributes().get(n, "bad").unwrap_err().is_not_found());
    }

    #[test]
    fn set_serialized_struct() {
        #[derive(Serialize)]
        struct Cell {
            a: f64,
            pbc: [bool; 3],
        }
        let (graph, n) = graph_and_node();
        graph
            .attributes()
            .set_serialized(n, "cell", &Cell { a: 5.43, pbc: [true; 3] })
            .unwrap();
        assert_eq!(
            graph.attributes().get(n, "cell").unwrap(),
            AttributeValue::Json(json!({"a": 5.43, "pbc": [true, true, true]}))
        );
    }

    #[test]
    fn delete_protects_internal_keys_of_finalized_nodes() {
        let (graph, n) = graph_and_node();
        graph.attributes().set(n, "_state", "done").unwrap();
        graph.attributes().set(n, "note", "x").unwrap();
        graph.nodes().finalize(n).unwrap();

        let err = graph.attributes().delete(n, "_state").unwrap_err();
        assert!(matches!(err, GraphError::ImmutableFieldViolation { .. }));
        graph.attributes().delete(n, "note").unwrap();
        assert!(graph.attributes().get(n, "note").unwrap_err().is_not_found());
        assert!(graph.attributes().delete(n, "note").unwrap_err().is_not_found());
    }

    #[test]
    fn attributes_sorted_by_key() {
        let (graph, n) = graph_and_node();
        graph.attributes().set(n, "b", 2).unwrap();
        graph.attributes().set(n, "a", 1).unwrap();
        let keys: Vec<String> = graph
            .attributes()
            .attributes(n)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
