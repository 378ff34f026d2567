//! Direct edges between nodes
//!
//! A link is closure-eligible when both endpoints are calculation or data
//! nodes. Eligible links feed the [closure](crate::closure) and must keep the
//! eligible subgraph acyclic; other links are stored and queryable but never
//! enter the closure.

use crate::closure::{self, RemovalCone, RemovalSummary};
use crate::config::RemovalStrategy;
use crate::error::{GraphError, GraphResult};
use crate::store::{ProvenanceGraph, Tables};
use crate::types::{Link, LinkId, NodeId};
use chrono::Utc;

/// Link manager view over a [`ProvenanceGraph`]
#[derive(Debug, Clone, Copy)]
pub struct LinkManager<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> LinkManager<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// Store a labeled edge and extend the closure if it is eligible
    ///
    /// Validation, the link insert and every closure row are applied under
    /// one write guard.
    ///
    /// # Errors
    /// - `NotFound` if either endpoint is missing
    /// - `CycleDetected` if the edge is eligible and `target` already reaches
    ///   `source` (or the edge is an eligible self-loop)
    pub fn add_link(&self, source: NodeId, target: NodeId, label: &str) -> GraphResult<LinkId> {
        let mut tables = self.graph.tables.write();
        let eligible = tables.node(source)?.category().feeds_closure()
            && tables.node(target)?.category().feeds_closure();

        if eligible && (source == target || tables.closure.reaches(target, source)) {
            return Err(GraphError::CycleDetected {
                from: source,
                to: target,
            });
        }

        let link = Link {
            id: LinkId(tables.next_link),
            source,
            target,
            label: label.to_string(),
            eligible,
            created_at: Utc::now(),
        };
        let id = link.id;
        tables.insert_link(link.clone());
        let rows = if eligible {
            closure::on_edge_added(&mut tables, &link)
        } else {
            0
        };
        tables.link_epoch += 1;
        tracing::debug!(link = %id, %source, %target, label, eligible, rows, "link added");
        Ok(id)
    }

    /// Delete an edge and repair the closure
    ///
    /// The removed link's cone is copied under a short shared guard and the
    /// removal is planned from that copy with no lock held. The exclusive
    /// guard is taken only to commit; if another link change committed in
    /// between, the cone is recaptured and replanned under it.
    ///
    /// # Errors
    /// `NotFound` if the link does not exist
    pub fn remove_link(&self, id: LinkId) -> GraphResult<RemovalSummary> {
        if self.graph.config().removal == RemovalStrategy::FullRebuild {
            return self.remove_and_rebuild(id);
        }

        let cone = {
            let tables = self.graph.tables.read();
            let link = tables.links.get(&id).ok_or(GraphError::link_not_found(id))?;
            RemovalCone::capture(&tables, link)
        };
        let plan = closure::plan_removal(&cone);

        let mut tables = self.graph.tables.write();
        let link = tables
            .links
            .get(&id)
            .cloned()
            .ok_or(GraphError::link_not_found(id))?;
        let plan = if tables.link_epoch == cone.epoch() {
            plan
        } else {
            tracing::debug!(link = %id, "link table changed during planning, replanning");
            closure::plan_removal(&RemovalCone::capture(&tables, &link))
        };
        tables.remove_link_record(id);
        let summary = closure::on_edge_removed(&mut tables, plan);
        tables.link_epoch += 1;
        tracing::debug!(
            link = %id,
            source = %link.source,
            target = %link.target,
            cone_rows = summary.cone_rows,
            deleted = summary.deleted,
            refreshed = summary.refreshed,
            "link removed"
        );
        Ok(summary)
    }

    fn remove_and_rebuild(&self, id: LinkId) -> GraphResult<RemovalSummary> {
        let mut tables = self.graph.tables.write();
        let before = tables.closure.len();
        let link = tables
            .remove_link_record(id)
            .ok_or(GraphError::link_not_found(id))?;
        let after = if link.eligible {
            closure::rebuild(&mut tables)
        } else {
            before
        };
        tables.link_epoch += 1;
        tracing::debug!(link = %id, rows = after, "link removed, closure rebuilt");
        Ok(RemovalSummary {
            cone_rows: before,
            deleted: before.saturating_sub(after),
            refreshed: 0,
        })
    }

    /// # Errors
    /// `NotFound` if the link does not exist
    pub fn get_link(&self, id: LinkId) -> GraphResult<Link> {
        self.graph
            .tables
            .read()
            .links
            .get(&id)
            .cloned()
            .ok_or(GraphError::link_not_found(id))
    }

    /// Links entering `node`, eligible or not, in insertion order
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn inputs(&self, node: NodeId) -> GraphResult<Vec<Link>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        Ok(collect(&tables, tables.incoming.get(&node)))
    }

    /// Links leaving `node`, eligible or not, in insertion order
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn outputs(&self, node: NodeId) -> GraphResult<Vec<Link>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        Ok(collect(&tables, tables.outgoing.get(&node)))
    }

    /// Parallel links from `source` to `target`
    #[must_use]
    pub fn links_between(&self, source: NodeId, target: NodeId) -> Vec<Link> {
        let tables = self.graph.tables.read();
        collect(&tables, tables.outgoing.get(&source))
            .into_iter()
            .filter(|link| link.target == target)
            .collect()
    }

    /// Number of stored links, eligible or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.tables.read().links.len()
    }

    /// Whether no link is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect(tables: &Tables, ids: Option<&std::collections::BTreeSet<LinkId>>) -> Vec<Link> {
    ids.into_iter()
        .flatten()
        .filter_map(|id| tables.links.get(id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::types::OwnerRef;

    fn node(graph: &ProvenanceGraph, tag: &str) -> NodeId {
        graph.nodes().create(tag, "", "", OwnerRef::new("u"))
    }

    #[test]
    fn eligibility_follows_endpoint_categories() {
        let graph = ProvenanceGraph::default();
        let code = node(&graph, "code.x");
        let data = node(&graph, "data.y");
        let calc = node(&graph, "calculation.z");

        let ineligible = graph.links().add_link(code, calc, "code").unwrap();
        let eligible = graph.links().add_link(data, calc, "in").unwrap();
        assert!(!graph.links().get_link(ineligible).unwrap().eligible);
        assert!(graph.links().get_link(eligible).unwrap().eligible);
        assert!(!graph.closure().is_ancestor(code, calc));
        assert!(graph.closure().is_ancestor(data, calc));
    }

    #[test]
    fn cycle_is_rejected_without_side_effects() {
        let graph = ProvenanceGraph::default();
        let a = node(&graph, "data.a");
        let b = node(&graph, "calculation.b");
        let c = node(&graph, "data.c");
        graph.links().add_link(a, b, "in").unwrap();
        graph.links().add_link(b, c, "out").unwrap();
        let rows = graph.closure().len();

        let err = graph.links().add_link(c, a, "back").unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert_eq!(graph.links().len(), 2);
        assert_eq!(graph.closure().len(), rows);
    }

    #[test]
    fn eligible_self_link_is_a_cycle() {
        let graph = ProvenanceGraph::default();
        let a = node(&graph, "data.a");
        assert!(matches!(
            graph.links().add_link(a, a, "self"),
            Err(GraphError::CycleDetected { .. })
        ));
        let code = node(&graph, "code.x");
        graph.links().add_link(code, code, "self").unwrap();
    }

    #[test]
    fn ineligible_back_edge_is_allowed() {
        let graph = ProvenanceGraph::default();
        let calc = node(&graph, "calculation.a");
        let code = node(&graph, "code.b");
        graph.links().add_link(code, calc, "code").unwrap();
        graph.links().add_link(calc, code, "log").unwrap();
        assert!(graph.closure().is_empty());
    }

    #[test]
    fn missing_endpoint_is_not_found() {
        let graph = ProvenanceGraph::default();
        let a = node(&graph, "data.a");
        assert!(graph.links().add_link(a, NodeId(42), "x").unwrap_err().is_not_found());
        assert!(graph.links().remove_link(LinkId(7)).unwrap_err().is_not_found());
    }

    #[test]
    fn parallel_links_and_queries() {
        let graph = ProvenanceGraph::default();
        let a = node(&graph, "data.a");
        let b = node(&graph, "calculation.b");
        let first = graph.links().add_link(a, b, "x").unwrap();
        let second = graph.links().add_link(a, b, "y").unwrap();
        assert_eq!(graph.links().links_between(a, b).len(), 2);
        assert_eq!(graph.closure().paths_between(a, b).len(), 2);
        assert_eq!(graph.links().outputs(a).unwrap().len(), 2);
        assert_eq!(graph.links().inputs(b).unwrap()[1].id, second);

        graph.links().remove_link(first).unwrap();
        assert!(graph.closure().is_ancestor(a, b));
        graph.links().remove_link(second).unwrap();
        assert!(!graph.closure().is_ancestor(a, b));
    }

    #[test]
    fn full_rebuild_strategy_matches_cone() {
        let cone = ProvenanceGraph::default();
        let full = ProvenanceGraph::new(GraphConfig::default().with_removal(RemovalStrategy::FullRebuild));
        for graph in [&cone, &full] {
            let a = node(graph, "data.a");
            let b = node(graph, "calculation.b");
            let c = node(graph, "data.c");
            let ab = graph.links().add_link(a, b, "in").unwrap();
            graph.links().add_link(b, c, "out").unwrap();
            graph.links().add_link(a, c, "shortcut").unwrap();
            graph.links().remove_link(ab).unwrap();
        }
        let pairs = |g: &ProvenanceGraph| -> Vec<(NodeId, NodeId)> {
            let mut p: Vec<_> = g.closure().rows().iter().map(|r| (r.ancestor, r.descendant)).collect();
            p.sort();
            p.dedup();
            p
        };
        assert_eq!(pairs(&cone), pairs(&full));
    }
}
