//! Testing utilities for the provgraph workspace
//!
//! Shared fixtures, a reachability oracle and a log capture writer.

#![allow(missing_docs)]

use parking_lot::Mutex;
use provgraph_core::{GraphConfig, LinkId, NodeId, OwnerRef, ProvenanceGraph, RemovalStrategy};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

pub fn owner() -> OwnerRef {
    OwnerRef::new("test-user")
}

pub fn setup_graph() -> ProvenanceGraph {
    ProvenanceGraph::new(GraphConfig::default())
}

pub fn setup_graph_with(removal: RemovalStrategy) -> ProvenanceGraph {
    ProvenanceGraph::new(GraphConfig::default().with_removal(removal))
}

pub fn data(graph: &ProvenanceGraph, label: &str) -> NodeId {
    graph.nodes().create("data.structure", label, "", owner())
}

pub fn calculation(graph: &ProvenanceGraph, label: &str) -> NodeId {
    graph.nodes().create("calculation.pw", label, "", owner())
}

pub fn code(graph: &ProvenanceGraph, label: &str) -> NodeId {
    graph.nodes().create("code.pw", label, "", owner())
}

/// `data -in-> calculation -out-> data`
pub struct Chain {
    pub input: NodeId,
    pub calc: NodeId,
    pub output: NodeId,
    pub in_link: LinkId,
    pub out_link: LinkId,
}

pub fn create_chain(graph: &ProvenanceGraph) -> Chain {
    let input = data(graph, "input");
    let calc = calculation(graph, "calc");
    let output = data(graph, "output");
    let in_link = graph.links().add_link(input, calc, "in").unwrap();
    let out_link = graph.links().add_link(calc, output, "out").unwrap();
    Chain {
        input,
        calc,
        output,
        in_link,
        out_link,
    }
}

/// Diamond `top -> {left, right} -> bottom` over data/calculation nodes
pub struct Diamond {
    pub top: NodeId,
    pub left: NodeId,
    pub right: NodeId,
    pub bottom: NodeId,
    pub links: [LinkId; 4],
}

pub fn create_diamond(graph: &ProvenanceGraph) -> Diamond {
    let top = data(graph, "top");
    let left = calculation(graph, "left");
    let right = calculation(graph, "right");
    let bottom = data(graph, "bottom");
    let links = [
        graph.links().add_link(top, left, "a").unwrap(),
        graph.links().add_link(top, right, "b").unwrap(),
        graph.links().add_link(left, bottom, "c").unwrap(),
        graph.links().add_link(right, bottom, "d").unwrap(),
    ];
    Diamond {
        top,
        left,
        right,
        bottom,
        links,
    }
}

/// Nodes reachable from `start` over eligible links, by breadth-first walk
pub fn reachable_from(graph: &ProvenanceGraph, start: NodeId) -> BTreeSet<NodeId> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for id in graph.nodes().ids() {
        for link in graph.links().outputs(id).unwrap() {
            if link.eligible {
                adjacency.entry(link.source).or_default().push(link.target);
            }
        }
    }
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for next in adjacency.get(&node).into_iter().flatten() {
            if seen.insert(*next) {
                queue.push_back(*next);
            }
        }
    }
    seen.remove(&start);
    seen
}

/// Closure pairs as a set, ignoring multiplicity
pub fn closure_pairs(graph: &ProvenanceGraph) -> BTreeSet<(NodeId, NodeId)> {
    graph
        .closure()
        .rows()
        .into_iter()
        .map(|row| (row.ancestor, row.descendant))
        .collect()
}

/// Shared in-memory sink for `tracing` output
#[derive(Debug, Clone, Default)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return what it logged
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let writer = CaptureWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, writer.contents())
}
