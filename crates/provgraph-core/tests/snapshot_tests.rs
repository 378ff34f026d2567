use pretty_assertions::assert_eq;
use provgraph_core::harness::verify_closure;
use provgraph_core::{AttributeValue, GraphConfig, GraphError, ProvenanceGraph, TypeRegistry};
use provgraph_test_utils::*;
use serde_json::json;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");

    let graph = setup_graph();
    let d = create_diamond(&graph);
    graph.attributes().set(d.left, "_state", "finished").unwrap();
    graph.attributes().set(d.top, "cell", json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]])).unwrap();
    graph.nodes().finalize(d.left).unwrap();
    graph.links().remove_link(d.links[0]).unwrap();
    graph.save_snapshot(&path).unwrap();

    let loaded = ProvenanceGraph::load_snapshot(&path, GraphConfig::default(), TypeRegistry::default()).unwrap();
    assert_eq!(loaded.stats(), graph.stats());
    assert_eq!(loaded.closure().rows(), graph.closure().rows());
    assert_eq!(loaded.nodes().get(d.left).unwrap(), graph.nodes().get(d.left).unwrap());
    assert_eq!(
        loaded.attributes().get(d.top, "cell").unwrap(),
        AttributeValue::Json(json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]]))
    );
    assert!(loaded.attributes().set(d.left, "_state", "again").is_err());
    assert!(verify_closure(&loaded).is_consistent());

    // closure maintenance keeps working on the loaded indexes
    loaded.links().remove_link(d.links[1]).unwrap();
    assert!(!loaded.closure().is_ancestor(d.top, d.bottom));
    assert!(verify_closure(&loaded).is_consistent());
}

#[test]
fn test_open_and_flush() {
    let dir = TempDir::new().unwrap();
    let config = GraphConfig::default().with_snapshot_path(dir.path().join("store.json"));

    let graph = ProvenanceGraph::open(config.clone(), TypeRegistry::default()).unwrap();
    assert!(graph.nodes().is_empty());
    create_chain(&graph);
    graph.flush().unwrap();
    assert!(!dir.path().join("store.json.tmp").exists());

    let reopened = ProvenanceGraph::open(config, TypeRegistry::default()).unwrap();
    assert_eq!(reopened.closure().len(), 3);
}

#[test]
fn test_flush_without_path_fails() {
    let graph = setup_graph();
    assert!(matches!(graph.flush(), Err(GraphError::Io(_))));
}

#[test]
fn test_corrupt_json_attribute_surfaces_on_get() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    let graph = setup_graph();
    let n = data(&graph, "d");
    graph.attributes().set(n, "meta", json!({"a": 1})).unwrap();
    graph.attributes().set(n, "plain", 3).unwrap();

    let mut snapshot = graph.snapshot();
    for record in &mut snapshot.attributes {
        if record.key == "meta" {
            record.value = provgraph_core::StoredValue::Json("{\"a\": ".to_string());
        }
    }
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let loaded = ProvenanceGraph::load_snapshot(&path, GraphConfig::default(), TypeRegistry::default()).unwrap();
    let err = loaded.attributes().get(n, "meta").unwrap_err();
    assert!(matches!(err, GraphError::CorruptAttribute { ref key, .. } if key == "meta"));
    assert_eq!(loaded.attributes().get(n, "plain").unwrap(), AttributeValue::Int(3));
}

#[test]
fn test_truncated_file_is_a_serialization_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    std::fs::write(&path, b"{\"format_version\": 1, \"nodes\": [").unwrap();
    let err = ProvenanceGraph::load_snapshot(&path, GraphConfig::default(), TypeRegistry::default()).unwrap_err();
    assert!(matches!(err, GraphError::Serialization(_)));
}

#[test]
fn test_wrong_format_version_is_corrupt() {
    let graph = setup_graph();
    let mut snapshot = graph.snapshot();
    snapshot.format_version = 99;
    let err = ProvenanceGraph::from_snapshot(snapshot, GraphConfig::default(), TypeRegistry::default()).unwrap_err();
    assert!(matches!(err, GraphError::CorruptSnapshot(_)));
}

#[test]
fn test_float_attributes_survive_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    let graph = setup_graph();
    let n = data(&graph, "d");
    let floats: Vec<f64> = (1..400u32)
        .map(|k| f64::from(k) * 0.0137 + 1.0 / f64::from(k))
        .collect();
    for (i, f) in floats.iter().enumerate() {
        graph.attributes().set(n, &format!("f{i}"), *f).unwrap();
    }
    graph.attributes().set(n, "all", json!(floats)).unwrap();
    graph.save_snapshot(&path).unwrap();

    let loaded = ProvenanceGraph::load_snapshot(&path, GraphConfig::default(), TypeRegistry::default()).unwrap();
    for (i, f) in floats.iter().enumerate() {
        assert_eq!(loaded.attributes().get(n, &format!("f{i}")).unwrap(), AttributeValue::Float(*f));
    }
    assert_eq!(loaded.attributes().get(n, "all").unwrap(), AttributeValue::Json(json!(floats)));
}

#[test]
fn test_concurrent_saves_leave_a_complete_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.json");
    let graph = setup_graph();
    let chain = create_chain(&graph);
    for i in 0..50 {
        graph.attributes().set(chain.calc, &format!("k{i}"), json!({"i": i, "pad": "x".repeat(64)})).unwrap();
    }

    for _ in 0..10 {
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| graph.save_snapshot(&path))).collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }
        });
        let loaded = ProvenanceGraph::load_snapshot(&path, GraphConfig::default(), TypeRegistry::default()).unwrap();
        assert_eq!(loaded.stats(), graph.stats());
    }

    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}
