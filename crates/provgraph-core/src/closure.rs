//! Materialized transitive closure over closure-eligible links
//!
//! # Row model
//!
//! Every row `(X, Y, pivot p)` records a path `X ->* source(p) -> target(p) ->* Y`.
//! Inserting eligible link `p = (s, t)` adds one row for every `X` in
//! `{s} ∪ ancestors(s)` and every `Y` in `{t} ∪ descendants(t)`, so the row
//! count per insertion is `|Anc| x |Desc|`.
//!
//! For any path in the graph, the row pivoted on its most recently inserted
//! link was created when that link went in. Removal keeps exactly the rows
//! whose pivot path still exists, which preserves that property for every
//! surviving path: the closure stays an exact mirror of reachability.
//!
//! # Removal
//!
//! Only pairs inside the removed link's cone (`ancestors(s) ∪ {s}` x
//! `descendants(t) ∪ {t}`) can lose a path. Those rows are re-checked with a
//! breadth-first walk over the remaining eligible links; everything else is
//! left alone. The walk runs over a `RemovalCone` copied out of the tables,
//! not over the live tables.

use crate::error::GraphResult;
use crate::store::{ProvenanceGraph, Tables};
use crate::types::{ClosurePath, Link, LinkId, NodeId, PathId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Row content before a handle is assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathSpec {
    pub(crate) ancestor: NodeId,
    pub(crate) descendant: NodeId,
    pub(crate) depth: u32,
    pub(crate) entry_edge: LinkId,
    pub(crate) direct_edge: Option<LinkId>,
    pub(crate) exit_edge: LinkId,
    pub(crate) pivot: LinkId,
}

/// Closure rows with ancestor/descendant indexes
#[derive(Debug, Default, Clone)]
pub(crate) struct ClosureTable {
    rows: HashMap<PathId, ClosurePath>,
    by_ancestor: HashMap<NodeId, HashSet<PathId>>,
    by_descendant: HashMap<NodeId, HashSet<PathId>>,
    next_id: u64,
}

impl ClosureTable {
    pub(crate) fn insert(&mut self, spec: PathSpec) -> PathId {
        let id = PathId(self.next_id);
        self.next_id += 1;
        self.insert_row(ClosurePath {
            id,
            ancestor: spec.ancestor,
            descendant: spec.descendant,
            depth: spec.depth,
            entry_edge: spec.entry_edge,
            direct_edge: spec.direct_edge,
            exit_edge: spec.exit_edge,
            pivot: spec.pivot,
        });
        id
    }

    /// Insert a row that already carries its handle (snapshot load)
    pub(crate) fn insert_row(&mut self, row: ClosurePath) {
        self.next_id = self.next_id.max(row.id.0 + 1);
        self.by_ancestor.entry(row.ancestor).or_default().insert(row.id);
        self.by_descendant
            .entry(row.descendant)
            .or_default()
            .insert(row.id);
        self.rows.insert(row.id, row);
    }

    pub(crate) fn remove(&mut self, id: PathId) -> Option<ClosurePath> {
        let row = self.rows.remove(&id)?;
        detach(&mut self.by_ancestor, row.ancestor, id);
        detach(&mut self.by_descendant, row.descendant, id);
        Some(row)
    }

    pub(crate) fn get_mut(&mut self, id: PathId) -> Option<&mut ClosurePath> {
        self.rows.get_mut(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.by_ancestor.clear();
        self.by_descendant.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClosurePath> {
        self.rows.values()
    }

    pub(crate) fn rows_from(&self, ancestor: NodeId) -> impl Iterator<Item = &ClosurePath> {
        self.by_ancestor
            .get(&ancestor)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }

    pub(crate) fn rows_to(&self, descendant: NodeId) -> impl Iterator<Item = &ClosurePath> {
        self.by_descendant
            .get(&descendant)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }

    pub(crate) fn ancestors(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.rows_to(node).map(|row| row.ancestor).collect()
    }

    pub(crate) fn descendants(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.rows_from(node).map(|row| row.descendant).collect()
    }

    pub(crate) fn reaches(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        self.rows_from(ancestor)
            .any(|row| row.descendant == descendant)
    }

    pub(crate) fn rows_between(&self, ancestor: NodeId, descendant: NodeId) -> Vec<ClosurePath> {
        let mut rows: Vec<ClosurePath> = self
            .rows_from(ancestor)
            .filter(|row| row.descendant == descendant)
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.depth, row.id));
        rows
    }
}

fn detach(index: &mut HashMap<NodeId, HashSet<PathId>>, node: NodeId, id: PathId) {
    if let Some(set) = index.get_mut(&node) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(&node);
        }
    }
}

/// Shortest recorded row per endpoint, as `(depth, edge)`
///
/// `pick` chooses which edge of the row to keep (entry or exit).
fn nearest<'a>(
    rows: impl Iterator<Item = &'a ClosurePath>,
    endpoint: impl Fn(&ClosurePath) -> NodeId,
    pick: impl Fn(&ClosurePath) -> LinkId,
) -> BTreeMap<NodeId, (u32, LinkId)> {
    let mut best: BTreeMap<NodeId, (u32, PathId, LinkId)> = BTreeMap::new();
    for row in rows {
        let candidate = (row.depth, row.id, pick(row));
        best.entry(endpoint(row))
            .and_modify(|current| {
                if (candidate.0, candidate.1) < (current.0, current.1) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }
    best.into_iter()
        .map(|(node, (depth, _, edge))| (node, (depth, edge)))
        .collect()
}

/// Rows to add for a newly inserted eligible link
///
/// The caller has already ruled out cycles, so no planned row is a self-pair.
pub(crate) fn plan_insertion(table: &ClosureTable, link: &Link) -> Vec<PathSpec> {
    let mut upstream = nearest(table.rows_to(link.source), |r| r.ancestor, |r| r.entry_edge);
    upstream.insert(link.source, (0, link.id));
    let mut downstream = nearest(table.rows_from(link.target), |r| r.descendant, |r| r.exit_edge);
    downstream.insert(link.target, (0, link.id));

    let mut plan = Vec::with_capacity(upstream.len() * downstream.len());
    for (&ancestor, &(up, entry_edge)) in &upstream {
        for (&descendant, &(down, exit_edge)) in &downstream {
            debug_assert_ne!(ancestor, descendant, "closure row would be a self-pair");
            let depth = up + 1 + down;
            plan.push(PathSpec {
                ancestor,
                descendant,
                depth,
                entry_edge,
                direct_edge: (depth == 1).then_some(link.id),
                exit_edge,
                pivot: link.id,
            });
        }
    }
    plan
}

/// Closure maintenance after an eligible link was stored
///
/// Returns the number of rows inserted.
pub(crate) fn on_edge_added(tables: &mut Tables, link: &Link) -> usize {
    let plan = plan_insertion(&tables.closure, link);
    let inserted = plan.len();
    for spec in plan {
        tables.closure.insert(spec);
    }
    inserted
}

/// Updated provenance for a row that survives a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathRefresh {
    pub(crate) id: PathId,
    pub(crate) depth: u32,
    pub(crate) entry_edge: LinkId,
    pub(crate) direct_edge: Option<LinkId>,
    pub(crate) exit_edge: LinkId,
}

/// Closure changes implied by removing one link
#[derive(Debug, Clone, Default)]
pub(crate) struct RemovalPlan {
    pub(crate) delete: Vec<PathId>,
    pub(crate) refresh: Vec<PathRefresh>,
    pub(crate) cone_rows: usize,
}

/// Outcome of a link removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovalSummary {
    /// Closure rows inside the removed link's cone
    pub cone_rows: usize,
    /// Rows dropped because no supporting path remains
    pub deleted: usize,
    /// Surviving rows whose depth or edge provenance changed
    pub refreshed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Hop {
    dist: u32,
    first: Option<LinkId>,
    last: Option<LinkId>,
}

/// Owned copy of everything a removal plan reads
///
/// Captured under a short shared guard. Planning then walks the copy with no
/// lock held, so writers are only blocked for the copy itself.
#[derive(Debug, Clone)]
pub(crate) struct RemovalCone {
    link: Link,
    epoch: u64,
    /// Rows with ancestor upstream of the link and descendant downstream of it
    rows: Vec<ClosurePath>,
    /// `(source, target)` of every pivot named by `rows`
    pivots: HashMap<LinkId, (NodeId, NodeId)>,
    /// Eligible outgoing links of every node reachable from the upstream
    /// side, without the removed link
    adjacency: HashMap<NodeId, Vec<(LinkId, NodeId)>>,
}

impl RemovalCone {
    pub(crate) fn capture(tables: &Tables, link: &Link) -> Self {
        let mut cone = Self {
            link: link.clone(),
            epoch: tables.link_epoch,
            rows: Vec::new(),
            pivots: HashMap::new(),
            adjacency: HashMap::new(),
        };
        if !link.eligible {
            return cone;
        }

        let mut upstream = tables.closure.ancestors(link.source);
        upstream.insert(link.source);
        let mut downstream: HashSet<NodeId> = tables.closure.descendants(link.target).into_iter().collect();
        downstream.insert(link.target);

        let mut region: HashSet<NodeId> = upstream.iter().copied().collect();
        for &ancestor in &upstream {
            let mut rows: Vec<&ClosurePath> = Vec::new();
            for row in tables.closure.rows_from(ancestor) {
                region.insert(row.descendant);
                if downstream.contains(&row.descendant) {
                    rows.push(row);
                }
            }
            rows.sort_by_key(|row| row.id);
            cone.rows.extend(rows.into_iter().cloned());
        }

        for row in &cone.rows {
            if let Some(pivot) = tables.links.get(&row.pivot) {
                cone.pivots.insert(pivot.id, (pivot.source, pivot.target));
            }
        }
        for node in region {
            let next: Vec<(LinkId, NodeId)> = tables
                .outgoing
                .get(&node)
                .into_iter()
                .flatten()
                .filter(|id| **id != link.id)
                .filter_map(|id| tables.links.get(id))
                .filter(|l| l.eligible)
                .map(|l| (l.id, l.target))
                .collect();
            if !next.is_empty() {
                cone.adjacency.insert(node, next);
            }
        }
        cone
    }

    /// `link_epoch` at capture time
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Lazily computed forward reachability over a captured cone
struct Walker<'c> {
    adjacency: &'c HashMap<NodeId, Vec<(LinkId, NodeId)>>,
    cache: HashMap<NodeId, HashMap<NodeId, Hop>>,
}

impl<'c> Walker<'c> {
    fn new(adjacency: &'c HashMap<NodeId, Vec<(LinkId, NodeId)>>) -> Self {
        Self {
            adjacency,
            cache: HashMap::new(),
        }
    }

    fn hop(&mut self, from: NodeId, to: NodeId) -> Option<Hop> {
        if from == to {
            return Some(Hop {
                dist: 0,
                first: None,
                last: None,
            });
        }
        let adjacency = self.adjacency;
        self.cache
            .entry(from)
            .or_insert_with(|| explore(adjacency, from))
            .get(&to)
            .copied()
    }
}

/// Breadth-first walk recording distance and first/last link per node
fn explore(adjacency: &HashMap<NodeId, Vec<(LinkId, NodeId)>>, from: NodeId) -> HashMap<NodeId, Hop> {
    let mut seen = HashMap::new();
    seen.insert(
        from,
        Hop {
            dist: 0,
            first: None,
            last: None,
        },
    );
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        let Some(here) = seen.get(&node).copied() else {
            continue;
        };
        for &(id, target) in adjacency.get(&node).into_iter().flatten() {
            if seen.contains_key(&target) {
                continue;
            }
            seen.insert(
                target,
                Hop {
                    dist: here.dist + 1,
                    first: here.first.or(Some(id)),
                    last: Some(id),
                },
            );
            queue.push_back(target);
        }
    }
    seen
}

/// Work out which rows a removal deletes or refreshes
pub(crate) fn plan_removal(cone: &RemovalCone) -> RemovalPlan {
    let mut plan = RemovalPlan::default();
    let mut walker = Walker::new(&cone.adjacency);
    for row in &cone.rows {
        plan.cone_rows += 1;
        if row.pivot == cone.link.id {
            plan.delete.push(row.id);
            continue;
        }
        let Some(&(source, target)) = cone.pivots.get(&row.pivot) else {
            plan.delete.push(row.id);
            continue;
        };
        let head = walker.hop(row.ancestor, source);
        let tail = walker.hop(target, row.descendant);
        let (Some(head), Some(tail)) = (head, tail) else {
            plan.delete.push(row.id);
            continue;
        };

        let depth = head.dist + 1 + tail.dist;
        let refresh = PathRefresh {
            id: row.id,
            depth,
            entry_edge: head.first.unwrap_or(row.pivot),
            direct_edge: (depth == 1).then_some(row.pivot),
            exit_edge: tail.last.unwrap_or(row.pivot),
        };
        if (refresh.depth, refresh.entry_edge, refresh.direct_edge, refresh.exit_edge)
            != (row.depth, row.entry_edge, row.direct_edge, row.exit_edge)
        {
            plan.refresh.push(refresh);
        }
    }
    plan
}

/// Apply a removal plan computed against the current tables
pub(crate) fn on_edge_removed(tables: &mut Tables, plan: RemovalPlan) -> RemovalSummary {
    let summary = RemovalSummary {
        cone_rows: plan.cone_rows,
        deleted: plan.delete.len(),
        refreshed: plan.refresh.len(),
    };
    for id in plan.delete {
        tables.closure.remove(id);
    }
    for refresh in plan.refresh {
        if let Some(row) = tables.closure.get_mut(refresh.id) {
            row.depth = refresh.depth;
            row.entry_edge = refresh.entry_edge;
            row.direct_edge = refresh.direct_edge;
            row.exit_edge = refresh.exit_edge;
        }
    }
    summary
}

/// Replay every eligible link, in insertion order, into an empty closure
///
/// Returns the number of rows in the rebuilt closure.
pub(crate) fn rebuild(tables: &mut Tables) -> usize {
    tables.closure.clear();
    let eligible: Vec<Link> = tables
        .links
        .values()
        .filter(|link| link.eligible)
        .cloned()
        .collect();
    for link in &eligible {
        on_edge_added(tables, link);
    }
    tables.closure.len()
}

/// Read-only view of the closure table
///
/// Queries never walk the graph; they project stored rows.
#[derive(Debug, Clone, Copy)]
pub struct ClosureIndex<'g> {
    graph: &'g ProvenanceGraph,
}

impl<'g> ClosureIndex<'g> {
    pub(crate) fn new(graph: &'g ProvenanceGraph) -> Self {
        Self { graph }
    }

    /// Every node that reaches `node` over eligible links
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn query_ancestors(&self, node: NodeId) -> GraphResult<BTreeSet<NodeId>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        Ok(tables.closure.ancestors(node))
    }

    /// Every node reachable from `node` over eligible links
    ///
    /// # Errors
    /// `NotFound` if the node does not exist
    pub fn query_descendants(&self, node: NodeId) -> GraphResult<BTreeSet<NodeId>> {
        let tables = self.graph.tables.read();
        tables.node(node)?;
        Ok(tables.closure.descendants(node))
    }

    /// Whether `descendant` is reachable from `ancestor`
    #[must_use]
    pub fn is_ancestor(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        self.graph.tables.read().closure.reaches(ancestor, descendant)
    }

    /// All rows recorded for a pair, shortest first
    #[must_use]
    pub fn paths_between(&self, ancestor: NodeId, descendant: NodeId) -> Vec<ClosurePath> {
        self.graph
            .tables
            .read()
            .closure
            .rows_between(ancestor, descendant)
    }

    /// Length of the shortest eligible path, if any
    #[must_use]
    pub fn distance(&self, ancestor: NodeId, descendant: NodeId) -> Option<u32> {
        self.graph
            .tables
            .read()
            .closure
            .rows_from(ancestor)
            .filter(|row| row.descendant == descendant)
            .map(|row| row.depth)
            .min()
    }

    /// Every row, ordered by handle
    #[must_use]
    pub fn rows(&self) -> Vec<ClosurePath> {
        let tables = self.graph.tables.read();
        let mut rows: Vec<ClosurePath> = tables.closure.iter().cloned().collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Number of stored rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.tables.read().closure.len()
    }

    /// Whether no pair is reachable
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the whole closure from the link table
    ///
    /// Returns the resulting row count.
    pub fn rebuild(&self) -> usize {
        let mut tables = self.graph.tables.write();
        let rows = rebuild(&mut tables);
        tables.link_epoch += 1;
        tracing::info!(rows, "closure rebuilt");
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn link(id: u64, source: u64, target: u64) -> Link {
        Link {
            id: LinkId(id),
            source: NodeId(source),
            target: NodeId(target),
            label: String::new(),
            eligible: true,
            created_at: Utc::now(),
        }
    }

    fn add(tables: &mut Tables, link: Link) {
        tables.insert_link(link.clone());
        on_edge_added(tables, &link);
    }

    fn remove(tables: &mut Tables, id: u64) {
        let link = tables.links.get(&LinkId(id)).cloned().unwrap();
        let plan = plan_removal(&RemovalCone::capture(tables, &link));
        tables.remove_link_record(link.id);
        on_edge_removed(tables, plan);
    }

    #[test]
    fn single_edge_produces_direct_row() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));

        let rows = tables.closure.rows_between(NodeId(1), NodeId(2));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].depth, 1);
        assert_eq!(rows[0].direct_edge, Some(LinkId(0)));
        assert_eq!(rows[0].entry_edge, LinkId(0));
        assert_eq!(rows[0].exit_edge, LinkId(0));
    }

    #[test]
    fn chain_composes_depth_and_edges() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 3));
        add(&mut tables, link(2, 3, 4));

        let rows = tables.closure.rows_between(NodeId(1), NodeId(4));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].depth, 3);
        assert_eq!(rows[0].entry_edge, LinkId(0));
        assert_eq!(rows[0].exit_edge, LinkId(2));
        assert_eq!(rows[0].direct_edge, None);
        assert_eq!(tables.closure.len(), 6);
    }

    #[test]
    fn bridging_edge_joins_both_cones() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 3, 4));
        // 1 -> 2 => 3 -> 4
        add(&mut tables, link(2, 2, 3));

        assert_eq!(
            tables.closure.descendants(NodeId(1)),
            [NodeId(2), NodeId(3), NodeId(4)].into_iter().collect()
        );
        let rows = tables.closure.rows_between(NodeId(1), NodeId(4));
        assert_eq!(rows[0].pivot, LinkId(2));
        assert_eq!(rows[0].depth, 3);
    }

    #[test]
    fn parallel_paths_get_distinct_rows() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 4));
        add(&mut tables, link(2, 1, 3));
        add(&mut tables, link(3, 3, 4));

        let rows = tables.closure.rows_between(NodeId(1), NodeId(4));
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].pivot, rows[1].pivot);
    }

    #[test]
    fn removal_keeps_rows_with_alternate_support() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 4));
        add(&mut tables, link(2, 1, 3));
        add(&mut tables, link(3, 3, 4));

        remove(&mut tables, 0);

        assert!(tables.closure.reaches(NodeId(1), NodeId(4)));
        assert!(!tables.closure.reaches(NodeId(1), NodeId(2)));
        let rows = tables.closure.rows_between(NodeId(1), NodeId(4));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry_edge, LinkId(2));
    }

    #[test]
    fn removal_refreshes_depth_when_shortcut_disappears() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 3));
        add(&mut tables, link(2, 3, 4));
        // shortcut 1 -> 3
        add(&mut tables, link(3, 1, 3));
        let before: u32 = tables
            .closure
            .rows_between(NodeId(1), NodeId(4))
            .iter()
            .map(|r| r.depth)
            .min()
            .unwrap();
        assert_eq!(before, 2);

        remove(&mut tables, 3);

        let rows = tables.closure.rows_between(NodeId(1), NodeId(4));
        assert_eq!(rows.iter().map(|r| r.depth).min(), Some(3));
    }

    #[test]
    fn captured_cone_plans_without_the_tables() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 4));
        add(&mut tables, link(2, 1, 3));
        add(&mut tables, link(3, 3, 4));
        add(&mut tables, link(4, 5, 6));

        let removed = tables.links.get(&LinkId(0)).cloned().unwrap();
        let cone = RemovalCone::capture(&tables, &removed);
        assert_eq!(cone.epoch(), tables.link_epoch);
        assert!(!cone.adjacency.contains_key(&NodeId(5)));
        assert!(cone.adjacency.values().flatten().all(|(id, _)| *id != LinkId(0)));

        let live = plan_removal(&RemovalCone::capture(&tables, &removed));
        drop(tables);
        let detached = plan_removal(&cone);
        assert_eq!(detached.delete, live.delete);
        assert_eq!(detached.refresh, live.refresh);
        assert_eq!(detached.cone_rows, 3);
    }

    #[test]
    fn rebuild_matches_incremental_pairs() {
        let mut tables = Tables::default();
        add(&mut tables, link(0, 1, 2));
        add(&mut tables, link(1, 2, 3));
        add(&mut tables, link(2, 1, 3));
        let pairs = |t: &Tables| -> BTreeSet<(NodeId, NodeId)> {
            t.closure.iter().map(|r| (r.ancestor, r.descendant)).collect()
        };
        let incremental = pairs(&tables);
        rebuild(&mut tables);
        assert_eq!(pairs(&tables), incremental);
    }
}
