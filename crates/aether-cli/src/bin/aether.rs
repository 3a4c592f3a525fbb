//! Aether CLI - runs the belief-fusion engine over a demo engine plant
//!
//! Usage:
//!   aether                                   # Fuse all algorithms, no evidence
//!   aether --evidence S001=0.1               # A vibration alarm on S001
//!   aether --algorithms bn,mcmc --ticks 3    # Three committed ticks
//!   aether --evidence S001=0.1 --sensitivity S001 -o json

use std::io;
use std::process;

use aether_core::metrics::{rank_suspects, system_entropy, Suspect};
use aether_core::{
    commit, AlgorithmId, AlgorithmSet, BeliefEngine, ConsensusReport, DomainContext, EdgeData,
    EdgeKind, EngineConfig, Evidence, ExecError, NodeData, NodeId, NodeKind, ProcessGraph,
    SensitivityReport,
};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "aether")]
#[command(version)]
#[command(about = "Aether - multi-algorithm belief fusion over process graphs")]
#[command(
    long_about = "Fuse eight belief estimators over a design -> manufacturing -> support demo plant"
)]
struct Cli {
    /// Observed health as ID=VALUE with VALUE in [0, 1]; repeatable
    #[arg(short, long, value_name = "ID=VALUE", value_parser = parse_evidence)]
    evidence: Vec<(String, f64)>,

    /// Comma-separated algorithms (bn, mcs, mcmc, dt, lr, logreg, vi, transformer)
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "bn,mcs,mcmc,dt,lr,logreg,vi,transformer"
    )]
    algorithms: Vec<AlgorithmId>,

    /// Run inference only; never update learned weights
    #[arg(long)]
    no_training: bool,

    /// Number of analyze/commit cycles
    #[arg(long, default_value_t = 1, value_name = "N")]
    ticks: usize,

    /// Rank every node's influence on TARGET after the last tick
    #[arg(long, value_name = "TARGET")]
    sensitivity: Option<String>,

    /// Estimator used by the sensitivity analysis
    #[arg(long, value_enum, default_value_t = SensitivityAlgorithm::Bn)]
    sensitivity_algorithm: SensitivityAlgorithm,

    /// JSON engine configuration; missing fields keep their defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Seed for the sampling runners (overrides the config file)
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Output format: summary or json
    #[arg(short, long, default_value = "summary", value_name = "FORMAT")]
    output: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum SensitivityAlgorithm {
    Bn,
    Dt,
}

impl From<SensitivityAlgorithm> for AlgorithmId {
    fn from(value: SensitivityAlgorithm) -> Self {
        match value {
            SensitivityAlgorithm::Bn => AlgorithmId::Bn,
            SensitivityAlgorithm::Dt => AlgorithmId::Dt,
        }
    }
}

fn parse_evidence(raw: &str) -> Result<(String, f64), String> {
    let (id, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got '{}'", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value in '{}': {}", raw, e))?;
    Ok((id.trim().to_string(), value))
}

#[derive(Serialize)]
struct Outcome {
    ticks: usize,
    report: ConsensusReport,
    entropy: f64,
    suspects: Vec<Suspect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensitivity: Option<SensitivityReport>,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_writer(io::stderr).with_env_filter(filter).init();

    match run(&cli) {
        Ok(outcome) => match cli.output.as_str() {
            "json" => match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing to JSON: {}", e);
                    process::exit(1);
                }
            },
            _ => print_summary(&outcome),
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<Outcome, ExecError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    let mut engine = BeliefEngine::new(config)?;
    let mut graph = demo_plant()?;
    let evidence: Evidence = cli
        .evidence
        .iter()
        .map(|(id, value)| (NodeId::from(id.as_str()), *value))
        .collect();
    let algorithms: AlgorithmSet = cli.algorithms.iter().copied().collect();
    let ticks = cli.ticks.max(1);

    let mut report = None;
    for tick in 1..=ticks {
        let fused =
            engine.analyze_detailed(&mut graph, &evidence, &algorithms, !cli.no_training)?;
        commit(&mut graph, &fused.scores)?;
        info!(tick, entropy = system_entropy(&fused.scores), "tick committed");
        report = Some(fused);
    }
    let report = report.ok_or_else(|| ExecError::Internal("no tick was run".into()))?;

    let sensitivity = match &cli.sensitivity {
        Some(target) => Some(engine.run_sensitivity_analysis(
            &graph,
            target,
            &evidence,
            cli.sensitivity_algorithm.into(),
        )?),
        None => None,
    };

    Ok(Outcome {
        ticks,
        entropy: system_entropy(&report.scores),
        suspects: rank_suspects(&graph, &report.scores, Some(DomainContext::Support)),
        report,
        sensitivity,
    })
}

fn load_config(path: &str) -> Result<EngineConfig, ExecError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ExecError::ValidationError(format!("cannot read config '{}': {}", path, e))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| ExecError::ValidationError(format!("invalid config '{}': {}", path, e)))
}

/// An engine design feeding two manufactured parts, observed through two sensors.
///
/// Attribute confidences are one minus each item's prior failure probability.
fn demo_plant() -> Result<ProcessGraph, ExecError> {
    let mut graph = ProcessGraph::default();
    let nodes = [
        ("D001", "Engine Drawing V1", DomainContext::Design, "design_review", 0.95),
        ("M001", "Piston Casting", DomainContext::Manufacturing, "casting", 0.98),
        ("M002", "Valve Forging", DomainContext::Manufacturing, "forging", 0.99),
        ("S001", "High Vibration", DomainContext::Support, "sensor", 0.999),
        ("S002", "Overheating", DomainContext::Support, "sensor", 0.999),
    ];
    for (id, name, context, attribute, confidence) in nodes {
        let kind = match context {
            DomainContext::Manufacturing => NodeKind::Process,
            DomainContext::Design | DomainContext::Support => NodeKind::Part,
        };
        graph.add_node(
            NodeData::new(id, kind, context)
                .with_name(name)
                .with_attribute(attribute, "nominal", confidence),
        )?;
    }

    let edges = [
        ("D001", "M001", EdgeKind::Structural, "production"),
        ("D001", "M002", EdgeKind::Structural, "production"),
        ("M001", "S001", EdgeKind::Logical, "diagnostics"),
        ("M002", "S002", EdgeKind::Logical, "diagnostics"),
        ("M001", "S002", EdgeKind::Logical, "diagnostics"),
    ];
    for (source, target, kind, domain) in edges {
        graph.add_edge(
            EdgeData::new(format!("{}->{}", source, target), source, target, kind)
                .with_domain(domain),
        )?;
    }
    Ok(graph)
}

fn print_summary(outcome: &Outcome) {
    let report = &outcome.report;
    println!(
        "✓ Fused {} nodes over {} tick(s)\n",
        report.scores.len(),
        outcome.ticks
    );

    if report.fell_back_to_bn {
        println!("No algorithm carried weight; showing raw BN scores\n");
    } else {
        println!("Runs ({}):", report.runs.len());
        for run in &report.runs {
            println!(
                "  {:<12} reliability {:.4}  weight {:.4}",
                run.algorithm.as_str(),
                run.reliability,
                run.weight
            );
        }
        println!();
    }

    println!("Scores:");
    for (id, score) in &report.scores {
        println!("  {:<6} {:.4}", id, score);
    }

    println!("\nSystem entropy: {:.4} bits", outcome.entropy);

    if let Some(top) = outcome.suspects.first() {
        println!("\nSuspects (design and manufacturing):");
        for suspect in &outcome.suspects {
            println!(
                "  {:<6} {:<16} {:.4}",
                suspect.id, suspect.name, suspect.health
            );
        }
        println!("\nMost likely root cause: {} ({})", top.name, top.id);
    }

    if let Some(sensitivity) = &outcome.sensitivity {
        println!("\nSensitivity ({}):", sensitivity.len());
        for (key, influence) in sensitivity.ranked() {
            println!("  {:<24} {:.4}", key, influence);
        }
    }
}
