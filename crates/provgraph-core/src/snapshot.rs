//! Persisted graph layout
//!
//! A snapshot holds the four core record sets (nodes, links, closure paths,
//! attributes) plus groups and comments. Secondary indexes are rebuilt on
//! load. Each write goes to its own temporary file in the target directory,
//! which is fsynced and renamed into place, so a crash or a concurrent save
//! leaves either the old or a complete new snapshot.

use crate::config::GraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::registry::TypeRegistry;
use crate::store::{ProvenanceGraph, Tables};
use crate::types::{ClosurePath, Comment, Group, Link, Node};
use crate::value::AttributeRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Layout version written into every snapshot
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Handle allocators, persisted so ids are never reused
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Next node handle
    pub next_node: u64,
    /// Next link handle
    pub next_link: u64,
    /// Next group handle
    pub next_group: u64,
    /// Next comment handle
    pub next_comment: u64,
}

/// Serializable image of a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Must equal [`SNAPSHOT_FORMAT_VERSION`]
    pub format_version: u32,
    /// Handle allocators
    #[serde(default)]
    pub counters: Counters,
    /// Nodes, ordered by handle
    pub nodes: Vec<Node>,
    /// Links, ordered by handle
    pub links: Vec<Link>,
    /// Closure rows, ordered by handle
    pub paths: Vec<ClosurePath>,
    /// Attribute rows, ordered by node then key
    pub attributes: Vec<AttributeRecord>,
    /// Groups, ordered by handle
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Comments, ordered by handle
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Snapshot {
    fn capture(tables: &Tables) -> Self {
        let mut paths: Vec<ClosurePath> = tables.closure.iter().cloned().collect();
        paths.sort_by_key(|row| row.id);
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            counters: Counters {
                next_node: tables.next_node,
                next_link: tables.next_link,
                next_group: tables.next_group,
                next_comment: tables.next_comment,
            },
            nodes: tables.nodes.values().cloned().collect(),
            links: tables.links.values().cloned().collect(),
            paths,
            attributes: {
                let mut records: Vec<AttributeRecord> = tables
                    .attributes
                    .values()
                    .flat_map(|attrs| attrs.values().cloned())
                    .collect();
                records.sort_by(|a, b| (a.node, &a.key).cmp(&(b.node, &b.key)));
                records
            },
            groups: tables.groups.values().cloned().collect(),
            comments: tables.comments.values().cloned().collect(),
        }
    }

    /// Rebuild tables and indexes, checking referential integrity
    fn into_tables(self) -> GraphResult<Tables> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }

        let mut tables = Tables::default();
        for node in self.nodes {
            if tables.nodes.contains_key(&node.id) {
                return Err(corrupt(format!("duplicate node {}", node.id)));
            }
            if tables.uuids.contains_key(&node.uuid) {
                return Err(corrupt(format!("duplicate uuid {}", node.uuid)));
            }
            tables.insert_node(node);
        }

        for link in self.links {
            if tables.links.contains_key(&link.id) {
                return Err(corrupt(format!("duplicate link {}", link.id)));
            }
            let source = tables
                .nodes
                .get(&link.source)
                .ok_or_else(|| corrupt(format!("link {} has unknown source {}", link.id, link.source)))?;
            let target = tables
                .nodes
                .get(&link.target)
                .ok_or_else(|| corrupt(format!("link {} has unknown target {}", link.id, link.target)))?;
            let eligible = source.category().feeds_closure() && target.category().feeds_closure();
            if eligible != link.eligible {
                return Err(corrupt(format!("link {} has a wrong eligibility flag", link.id)));
            }
            tables.insert_link(link);
        }

        let mut path_ids = HashSet::new();
        for row in self.paths {
            if !path_ids.insert(row.id) {
                return Err(corrupt(format!("duplicate closure path {}", row.id)));
            }
            if row.ancestor == row.descendant {
                return Err(corrupt(format!("closure path {} is a self-pair", row.id)));
            }
            if !tables.nodes.contains_key(&row.ancestor) || !tables.nodes.contains_key(&row.descendant) {
                return Err(corrupt(format!("closure path {} refers to an unknown node", row.id)));
            }
            if row.depth == 0 {
                return Err(corrupt(format!("closure path {} has depth 0", row.id)));
            }
            if !tables.links.get(&row.pivot).is_some_and(|link| link.eligible) {
                return Err(corrupt(format!(
                    "closure path {} is pivoted on missing or ineligible link {}",
                    row.id, row.pivot
                )));
            }
            tables.closure.insert_row(row);
        }

        for record in self.attributes {
            if !tables.nodes.contains_key(&record.node) {
                return Err(corrupt(format!(
                    "attribute '{}' refers to unknown node {}",
                    record.key, record.node
                )));
            }
            let attrs = tables.attributes.entry(record.node).or_default();
            if attrs.contains_key(&record.key) {
                return Err(corrupt(format!(
                    "duplicate attribute '{}' on node {}",
                    record.key, record.node
                )));
            }
            attrs.insert(record.key.clone(), record);
        }

        for group in self.groups {
            if tables.group_names.contains_key(&group.name) || tables.groups.contains_key(&group.id) {
                return Err(corrupt(format!("duplicate group '{}'", group.name)));
            }
            if let Some(member) = group.members.iter().find(|m| !tables.nodes.contains_key(*m)) {
                return Err(corrupt(format!(
                    "group '{}' contains unknown node {member}",
                    group.name
                )));
            }
            tables.insert_group(group);
        }

        for comment in self.comments {
            if !tables.nodes.contains_key(&comment.node) {
                return Err(corrupt(format!(
                    "comment {} refers to unknown node {}",
                    comment.id, comment.node
                )));
            }
            tables.insert_comment(comment);
        }

        let counters = self.counters;
        tables.next_node = tables.next_node.max(counters.next_node);
        tables.next_link = tables.next_link.max(counters.next_link);
        tables.next_group = tables.next_group.max(counters.next_group);
        tables.next_comment = tables.next_comment.max(counters.next_comment);
        Ok(tables)
    }
}

fn corrupt(message: String) -> GraphError {
    GraphError::CorruptSnapshot(message)
}

impl ProvenanceGraph {
    /// Consistent image of the whole graph
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.tables.read())
    }

    /// Build a graph from a snapshot
    ///
    /// # Errors
    /// `CorruptSnapshot` if the snapshot breaks a referential invariant
    pub fn from_snapshot(snapshot: Snapshot, config: GraphConfig, registry: TypeRegistry) -> GraphResult<Self> {
        let tables = snapshot.into_tables()?;
        Ok(Self::from_tables(config, registry, tables))
    }

    /// Write a snapshot to `path` atomically
    ///
    /// Each save writes its own temporary file next to `path` and renames it
    /// into place, so concurrent saves never see each other's partial output.
    ///
    /// # Errors
    /// Io or serialization failure; the previous file is left intact
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> GraphResult<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot();
        let data = serde_json::to_vec_pretty(&snapshot)?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        #[cfg(unix)]
        {
            if let Err(error) = fs::File::open(dir).and_then(|d| d.sync_all()) {
                tracing::warn!(dir = %dir.display(), %error, "directory fsync after snapshot rename failed");
            }
        }

        tracing::info!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            links = snapshot.links.len(),
            paths = snapshot.paths.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load a graph from a snapshot file
    ///
    /// # Errors
    /// Io, serialization or `CorruptSnapshot` failure
    pub fn load_snapshot(path: impl AsRef<Path>, config: GraphConfig, registry: TypeRegistry) -> GraphResult<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        let graph = Self::from_snapshot(snapshot, config, registry)?;
        let stats = graph.stats();
        tracing::info!(
            path = %path.display(),
            nodes = stats.nodes,
            links = stats.links,
            paths = stats.closure_rows,
            "snapshot loaded"
        );
        Ok(graph)
    }

    /// Load from the configured snapshot path, or start empty if the file
    /// does not exist yet
    ///
    /// # Errors
    /// As [`load_snapshot`](Self::load_snapshot)
    pub fn open(config: GraphConfig, registry: TypeRegistry) -> GraphResult<Self> {
        match config.snapshot_path.clone() {
            Some(path) if path.exists() => Self::load_snapshot(path, config, registry),
            _ => Ok(Self::with_registry(config, registry)),
        }
    }

    /// Save to the configured snapshot path
    ///
    /// # Errors
    /// Io failure, including when no snapshot path is configured
    pub fn flush(&self) -> GraphResult<()> {
        let path = self.config().snapshot_path.clone().ok_or_else(|| {
            GraphError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no snapshot path configured",
            ))
        })?;
        self.save_snapshot(path)
    }
}
