//! Closure verification and randomized stress runs
//!
//! [`verify_closure`] recomputes reachability from the link table with
//! `petgraph` and compares it with the materialized rows: same pair set,
//! same minimum depth per pair, well-formed edge provenance on every row.
//! [`run_stress`] drives a graph through a seeded random sequence of link
//! insertions and removals and verifies along the way.

use crate::config::{GraphConfig, RemovalStrategy};
use crate::error::GraphError;
use crate::store::{ProvenanceGraph, Tables};
use crate::types::{LinkId, NodeId, OwnerRef, PathId};
use petgraph::algo::{dijkstra, is_cyclic_directed};
use petgraph::graphmap::DiGraphMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// A disagreement between the closure table and the link table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureViolation {
    /// Eligible links form a cycle
    Cyclic,
    /// Row with ancestor == descendant
    SelfPair {
        /// Offending row
        path: PathId,
        /// Node on both ends
        node: NodeId,
    },
    /// Reachable pair with no row
    MissingPair {
        /// Upstream node
        ancestor: NodeId,
        /// Downstream node
        descendant: NodeId,
    },
    /// Row for an unreachable pair
    SpuriousPair {
        /// Upstream node of the row
        ancestor: NodeId,
        /// Downstream node of the row
        descendant: NodeId,
    },
    /// Shortest row depth differs from the graph distance
    WrongDistance {
        /// Upstream node
        ancestor: NodeId,
        /// Downstream node
        descendant: NodeId,
        /// Breadth-first distance over eligible links
        expected: u32,
        /// Minimum depth over the pair's rows
        actual: u32,
    },
    /// Row whose edge references do not fit its endpoints
    MalformedRow {
        /// Offending row
        path: PathId,
        /// What does not fit
        reason: String,
    },
}

/// Outcome of [`verify_closure`]
#[derive(Debug, Clone, Default)]
pub struct ClosureReport {
    /// Reachable pairs according to the link table
    pub pairs: usize,
    /// Stored closure rows
    pub rows: usize,
    /// Every disagreement found, in discovery order
    pub violations: Vec<ClosureViolation>,
}

impl ClosureReport {
    /// No violations were found
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

fn oracle(tables: &Tables) -> DiGraphMap<NodeId, ()> {
    let mut graph = DiGraphMap::new();
    for id in tables.nodes.keys() {
        graph.add_node(*id);
    }
    for link in tables.links.values().filter(|link| link.eligible) {
        graph.add_edge(link.source, link.target, ());
    }
    graph
}

fn check_row_edges(tables: &Tables, row: &crate::types::ClosurePath) -> Result<(), String> {
    let edge = |id: LinkId| {
        tables
            .links
            .get(&id)
            .filter(|link| link.eligible)
            .ok_or_else(|| format!("edge {id} is missing or ineligible"))
    };
    let entry = edge(row.entry_edge)?;
    let exit = edge(row.exit_edge)?;
    edge(row.pivot)?;
    if entry.source != row.ancestor {
        return Err(format!("entry edge {} does not leave the ancestor", entry.id));
    }
    if exit.target != row.descendant {
        return Err(format!("exit edge {} does not enter the descendant", exit.id));
    }
    match (row.depth, row.direct_edge) {
        (0, _) => Err("depth 0".to_string()),
        (1, Some(direct)) if direct == row.entry_edge && direct == row.exit_edge => Ok(()),
        (1, _) => Err("depth 1 row without a matching direct edge".to_string()),
        (_, Some(_)) => Err("direct edge set on an indirect row".to_string()),
        (_, None) => Ok(()),
    }
}

/// Compare the materialized closure with reachability over eligible links
#[must_use]
pub fn verify_closure(graph: &ProvenanceGraph) -> ClosureReport {
    let tables = graph.tables.read();
    let reference = oracle(&tables);
    let mut report = ClosureReport {
        rows: tables.closure.len(),
        ..ClosureReport::default()
    };
    if is_cyclic_directed(&reference) {
        report.violations.push(ClosureViolation::Cyclic);
    }

    let mut stored: BTreeMap<(NodeId, NodeId), u32> = BTreeMap::new();
    let mut rows: Vec<_> = tables.closure.iter().collect();
    rows.sort_by_key(|row| row.id);
    for row in rows {
        if row.ancestor == row.descendant {
            report.violations.push(ClosureViolation::SelfPair {
                path: row.id,
                node: row.ancestor,
            });
            continue;
        }
        if let Err(reason) = check_row_edges(&tables, row) {
            report
                .violations
                .push(ClosureViolation::MalformedRow { path: row.id, reason });
        }
        stored
            .entry((row.ancestor, row.descendant))
            .and_modify(|depth| *depth = (*depth).min(row.depth))
            .or_insert(row.depth);
    }

    let mut expected: BTreeMap<(NodeId, NodeId), u32> = BTreeMap::new();
    for start in tables.nodes.keys() {
        let distances: HashMap<NodeId, u32> = dijkstra(&reference, *start, None, |_| 1u32);
        for (end, distance) in distances {
            if end != *start {
                expected.insert((*start, end), distance);
            }
        }
    }
    report.pairs = expected.len();

    for (&(ancestor, descendant), &distance) in &expected {
        match stored.get(&(ancestor, descendant)) {
            None => report.violations.push(ClosureViolation::MissingPair {
                ancestor,
                descendant,
            }),
            Some(&actual) if actual != distance => {
                report.violations.push(ClosureViolation::WrongDistance {
                    ancestor,
                    descendant,
                    expected: distance,
                    actual,
                });
            }
            Some(_) => {}
        }
    }
    for &(ancestor, descendant) in stored.keys() {
        if !expected.contains_key(&(ancestor, descendant)) {
            report.violations.push(ClosureViolation::SpuriousPair {
                ancestor,
                descendant,
            });
        }
    }
    report
}

/// Stress run configuration
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Nodes created up front, with random categories
    pub nodes: usize,
    /// Link insertions and removals to perform
    pub operations: usize,
    /// Probability that an operation removes a link
    pub removal_ratio: f64,
    /// Verify after every `verify_every` operations (0 = only at the end)
    pub verify_every: usize,
    /// Removal strategy of the graph under test
    pub removal: RemovalStrategy,
    /// End the run at the first failed verification
    pub stop_on_first_violation: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            nodes: 40,
            operations: 400,
            removal_ratio: 0.3,
            verify_every: 25,
            removal: RemovalStrategy::Cone,
            stop_on_first_violation: true,
        }
    }
}

/// Counters collected during a stress run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StressStats {
    /// Links stored, eligible or not
    pub links_added: u64,
    /// Stored links that do not feed the closure
    pub ineligible_links: u64,
    /// Insertions refused with `CycleDetected`
    pub cycles_rejected: u64,
    /// Links removed
    pub links_removed: u64,
    /// Closure rows dropped by removals
    pub rows_deleted: u64,
    /// Calls to [`verify_closure`]
    pub verifications: u64,
}

/// Final report of a stress run
#[derive(Debug, Clone)]
pub struct StressReport {
    /// Configuration the run used
    pub config: StressConfig,
    /// Operation counters
    pub stats: StressStats,
    /// Violations from every failed verification
    pub violations: Vec<ClosureViolation>,
    /// Unexpected errors returned by graph operations
    pub errors: Vec<String>,
    /// Closure rows at the end of the run
    pub final_rows: usize,
}

impl StressReport {
    /// No violations and no unexpected errors
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty() && self.errors.is_empty()
    }

    /// Human-readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "=== Closure Stress Report ===");
        let _ = writeln!(text, "Seed: {}", self.config.seed);
        let _ = writeln!(text, "Nodes: {}", self.config.nodes);
        let _ = writeln!(text, "Removal strategy: {:?}", self.config.removal);
        let _ = writeln!(text, "Links added: {}", self.stats.links_added);
        let _ = writeln!(text, "Ineligible links: {}", self.stats.ineligible_links);
        let _ = writeln!(text, "Cycles rejected: {}", self.stats.cycles_rejected);
        let _ = writeln!(text, "Links removed: {}", self.stats.links_removed);
        let _ = writeln!(text, "Rows deleted on removal: {}", self.stats.rows_deleted);
        let _ = writeln!(text, "Verifications: {}", self.stats.verifications);
        let _ = writeln!(text, "Final closure rows: {}", self.final_rows);
        if !self.violations.is_empty() || !self.errors.is_empty() {
            let _ = writeln!(text, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(text, "{}. {v:?}", i + 1);
            }
            for e in &self.errors {
                let _ = writeln!(text, "error: {e}");
            }
        }
        let _ = writeln!(
            text,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        text
    }
}

const STRESS_TAGS: [&str; 5] = [
    "data.structure",
    "data.array",
    "calculation.pw",
    "code.pw",
    "workflow.relax",
];

/// Build a random graph, interleave removals, and verify the closure
#[must_use]
pub fn run_stress(config: StressConfig) -> StressReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let graph = ProvenanceGraph::new(GraphConfig::default().with_removal(config.removal));
    let owner = OwnerRef::new("stress");
    let nodes: Vec<NodeId> = (0..config.nodes.max(2))
        .map(|i| {
            let tag = STRESS_TAGS[rng.gen_range(0..STRESS_TAGS.len())];
            graph.nodes().create(tag, &format!("n{i}"), "", owner.clone())
        })
        .collect();

    let mut stats = StressStats::default();
    let mut violations = Vec::new();
    let mut errors = Vec::new();
    let mut live: Vec<LinkId> = Vec::new();

    for step in 1..=config.operations {
        if !live.is_empty() && rng.gen_bool(config.removal_ratio.clamp(0.0, 1.0)) {
            let id = live.swap_remove(rng.gen_range(0..live.len()));
            match graph.links().remove_link(id) {
                Ok(summary) => {
                    stats.links_removed += 1;
                    stats.rows_deleted += summary.deleted as u64;
                }
                Err(e) => errors.push(format!("remove {id}: {e}")),
            }
        } else {
            let source = nodes[rng.gen_range(0..nodes.len())];
            let target = nodes[rng.gen_range(0..nodes.len())];
            match graph.links().add_link(source, target, &format!("e{step}")) {
                Ok(id) => {
                    stats.links_added += 1;
                    if graph.links().get_link(id).is_ok_and(|link| !link.eligible) {
                        stats.ineligible_links += 1;
                    }
                    live.push(id);
                }
                Err(GraphError::CycleDetected { .. }) => stats.cycles_rejected += 1,
                Err(e) => errors.push(format!("add {source} -> {target}: {e}")),
            }
        }

        let due = config.verify_every > 0 && step % config.verify_every == 0;
        if due || step == config.operations {
            stats.verifications += 1;
            let report = verify_closure(&graph);
            if !report.is_consistent() {
                tracing::warn!(step, violations = report.violations.len(), "closure diverged");
                violations.extend(report.violations);
                if config.stop_on_first_violation {
                    break;
                }
            }
        }
    }

    let final_rows = graph.closure().len();
    tracing::info!(
        seed = config.seed,
        added = stats.links_added,
        removed = stats.links_removed,
        final_rows,
        "stress run finished"
    );
    StressReport {
        config,
        stats,
        violations,
        errors,
        final_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_graph_is_consistent() {
        let report = verify_closure(&ProvenanceGraph::default());
        assert!(report.is_consistent());
        assert_eq!(report.pairs, 0);
    }

    #[test]
    fn tampered_row_is_reported() {
        let graph = ProvenanceGraph::default();
        let owner = OwnerRef::new("u");
        let a = graph.nodes().create("data.a", "", "", owner.clone());
        let b = graph.nodes().create("calculation.b", "", "", owner);
        graph.links().add_link(a, b, "in").unwrap();
        {
            let mut tables = graph.tables.write();
            let id = tables.closure.iter().map(|row| row.id).next().unwrap();
            tables.closure.get_mut(id).unwrap().depth = 3;
        }
        let report = verify_closure(&graph);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, ClosureViolation::WrongDistance { expected: 1, actual: 3, .. })));
    }

    #[test]
    fn short_stress_run_passes() {
        let report = run_stress(StressConfig {
            seed: 7,
            nodes: 12,
            operations: 120,
            verify_every: 10,
            ..StressConfig::default()
        });
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.links_added > 0);
        assert!(report.generate_text().contains("PASS"));
    }

    #[test]
    fn full_rebuild_stress_run_passes() {
        let report = run_stress(StressConfig {
            seed: 11,
            nodes: 10,
            operations: 80,
            removal: RemovalStrategy::FullRebuild,
            ..StressConfig::default()
        });
        assert!(report.passed(), "{}", report.generate_text());
    }
}
