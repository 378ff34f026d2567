use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use provgraph_core::harness::{run_stress, verify_closure, StressConfig};
use provgraph_core::logging::{init_tracing_with_format, LogFormat};
use provgraph_core::{GraphConfig, NodeId, ProvenanceGraph, RemovalStrategy, TypeRegistry};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("provgraph")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Provenance graph core: stress, verify and inspect closure snapshots")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON file with graph configuration"),
        )
        .arg(
            Arg::new("log-filter")
                .long("log-filter")
                .global(true)
                .help("Default tracing filter (RUST_LOG takes precedence)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("stress")
                .about("Build a random provenance graph and verify the closure as it changes")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("nodes")
                        .long("nodes")
                        .default_value("40")
                        .value_parser(value_parser!(usize))
                        .help("Number of nodes to create"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("400")
                        .value_parser(value_parser!(usize))
                        .help("Link insertions and removals to perform"),
                )
                .arg(
                    Arg::new("removal-ratio")
                        .long("removal-ratio")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Probability that an operation removes a link"),
                )
                .arg(
                    Arg::new("verify-every")
                        .long("verify-every")
                        .default_value("25")
                        .value_parser(value_parser!(usize))
                        .help("Verify after this many operations (0 = only at the end)"),
                )
                .arg(
                    Arg::new("full-rebuild")
                        .long("full-rebuild")
                        .action(ArgAction::SetTrue)
                        .help("Recompute the whole closure on every removal"),
                )
                .arg(
                    Arg::new("keep-going")
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Continue after the first violation"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a snapshot's closure against a reachability walk")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print graph statistics or one node's provenance")
                .arg(snapshot_arg())
                .arg(
                    Arg::new("node")
                        .long("node")
                        .value_parser(value_parser!(u64))
                        .help("Node id to describe"),
                ),
        )
}

fn snapshot_arg() -> Arg {
    Arg::new("snapshot")
        .long("snapshot")
        .value_parser(value_parser!(PathBuf))
        .help("Snapshot file (defaults to the configured snapshot path)")
}

fn load_config(matches: &ArgMatches) -> Result<GraphConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => GraphConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GraphConfig::default(),
    };
    if let Some(filter) = matches.get_one::<String>("log-filter") {
        config = config.with_log_filter(filter.clone());
    }
    Ok(config)
}

fn open_snapshot(config: &GraphConfig, args: &ArgMatches) -> Result<ProvenanceGraph> {
    let Some(path) = args
        .get_one::<PathBuf>("snapshot")
        .cloned()
        .or_else(|| config.snapshot_path.clone())
    else {
        bail!("no snapshot given: pass --snapshot or set snapshot_path in the config");
    };
    ProvenanceGraph::load_snapshot(&path, config.clone(), TypeRegistry::default())
        .with_context(|| format!("failed to load snapshot {}", path.display()))
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn stress(config: &GraphConfig, args: &ArgMatches) -> Result<bool> {
    let removal = if args.get_flag("full-rebuild") {
        RemovalStrategy::FullRebuild
    } else {
        config.removal
    };
    let stress_config = StressConfig {
        seed: arg(args, "seed")?,
        nodes: arg(args, "nodes")?,
        operations: arg(args, "operations")?,
        removal_ratio: arg(args, "removal-ratio")?,
        verify_every: arg(args, "verify-every")?,
        removal,
        stop_on_first_violation: !args.get_flag("keep-going"),
    };
    tracing::info!(
        seed = stress_config.seed,
        nodes = stress_config.nodes,
        operations = stress_config.operations,
        "starting stress run"
    );
    let report = run_stress(stress_config);
    println!("{}", report.generate_text());
    Ok(report.passed())
}

fn verify(config: &GraphConfig, args: &ArgMatches) -> Result<bool> {
    let graph = open_snapshot(config, args)?;
    let report = verify_closure(&graph);
    if args.get_flag("json") {
        let violations: Vec<String> = report.violations.iter().map(|v| format!("{v:?}")).collect();
        let out = serde_json::json!({
            "pairs": report.pairs,
            "rows": report.rows,
            "consistent": report.is_consistent(),
            "violations": violations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Reachable pairs: {}", report.pairs);
        println!("Closure rows: {}", report.rows);
        for v in &report.violations {
            println!("violation: {v:?}");
        }
        println!(
            "Result: {}",
            if report.is_consistent() { "PASS" } else { "FAIL" }
        );
    }
    Ok(report.is_consistent())
}

fn inspect(config: &GraphConfig, args: &ArgMatches) -> Result<bool> {
    let graph = open_snapshot(config, args)?;
    let Some(id) = args.get_one::<u64>("node").copied().map(NodeId) else {
        println!("{}", serde_json::to_string_pretty(&graph.stats())?);
        return Ok(true);
    };

    let resolved = graph.resolve_node(id)?;
    let node = &resolved.node;
    println!("node {} ({})", node.id, node.uuid);
    println!("  type: {} -> {:?}", node.type_tag, resolved.behavior);
    println!("  label: {}", node.label);
    println!("  state: {}, version {}, synced {}", node.state, node.version, node.sync_version);
    for link in graph.links().inputs(id)? {
        println!("  <- {} [{}]{}", link.source, link.label, if link.eligible { "" } else { " (ineligible)" });
    }
    for link in graph.links().outputs(id)? {
        println!("  -> {} [{}]{}", link.target, link.label, if link.eligible { "" } else { " (ineligible)" });
    }
    let ancestors = graph.closure().query_ancestors(id)?;
    let descendants = graph.closure().query_descendants(id)?;
    println!("  ancestors: {}", ancestors.len());
    println!("  descendants: {}", descendants.len());
    for (key, value) in graph.attributes().attributes(id)? {
        println!("  {key} = {}", value.to_json());
    }
    let missing = graph.missing_attributes(id)?;
    if !missing.is_empty() {
        println!("  missing: {}", missing.join(", "));
    }
    Ok(true)
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let format = if matches.get_flag("log-json") {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_tracing_with_format(&config.log_filter, format);

    let passed = match matches.subcommand() {
        Some(("stress", args)) => stress(&config, args)?,
        Some(("verify", args)) => verify(&config, args)?,
        Some(("inspect", args)) => inspect(&config, args)?,
        _ => unreachable!("subcommand_required"),
    };
    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
