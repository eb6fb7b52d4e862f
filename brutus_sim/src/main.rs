//! Brutus Simulator CLI
//!
//! Evolve demo or file-defined star clusters through an N-body engine.

use brutus_core::output::OutputResult;
use brutus_core::Cluster;
use brutus_env::ProcessLauncher;
use brutus_sim::config::{load_clusters, OutputConfig, OutputKind};
use brutus_sim::scenarios::ScenarioId;
use brutus_sim::{Integrator, ReferenceLauncher, SessionReport};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Brutus N-body orchestration CLI
#[derive(Parser, Debug)]
#[command(name = "brutus-sim")]
#[command(about = "Evolve star clusters through a Brutus N-body engine", long_about = None)]
struct Args {
    /// Demo scenario (three_body, n_body, n_cluster, random)
    #[arg(short = 'S', long, default_value = "three_body")]
    scenario: String,

    /// JSON cluster definition file (overrides --scenario)
    #[arg(short, long)]
    clusters: Option<PathBuf>,

    /// Engine output step
    #[arg(short, long, default_value = "0.1")]
    time_step: f64,

    /// Total simulated time
    #[arg(short, long, default_value = "1")]
    duration: f64,

    /// Concurrent engine sessions
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Bulirsch-Stoer tolerance passed to the engine
    #[arg(long, default_value = "1e-11")]
    tolerance: f64,

    /// Word length passed to the engine
    #[arg(long, default_value = "128")]
    word_length: u32,

    /// Per-session time budget in seconds
    #[arg(long)]
    timeout_secs: Option<f64>,

    /// External engine program (default: in-process reference engine)
    #[arg(short, long)]
    engine: Option<String>,

    /// Leading argument for the external engine (repeatable)
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Output handler (raw, table, file)
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Directory for file output
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Snapshot field delimiter
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Seed for the random scenario
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Star count for the random scenario
    #[arg(long, default_value = "8")]
    stars: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load(args: &Args) -> Vec<Cluster> {
    if let Some(path) = &args.clusters {
        return load_clusters(path).unwrap_or_else(|e| fail(e));
    }

    let scenario: ScenarioId = args.scenario.parse().unwrap_or_else(|e| {
        let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
        fail(format!("{} (available: {})", e, names.join(", ")))
    });
    info!("Scenario {}: {}", scenario, scenario.description());
    scenario
        .clusters(args.seed, args.stars)
        .unwrap_or_else(|e| fail(e))
}

fn describe(result: &OutputResult) -> String {
    match result {
        OutputResult::Raw(lines) => format!("{} raw lines", lines.len()),
        OutputResult::Table(table) => {
            let (rows, columns) = table.shape();
            format!("table {}x{}", rows, columns)
        }
        OutputResult::Empty => "written to disk".to_string(),
    }
}

fn report_json(report: &SessionReport) -> serde_json::Value {
    serde_json::json!({
        "cluster": report.cluster,
        "session": report.session_id.to_string(),
        "completed": report.is_success(),
        "lines": report.lines,
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "error": report.error().map(|e| e.to_string()),
        "result": report.result(),
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Brutus Simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    let clusters = load(&args);
    let kind: OutputKind = args.output.parse().unwrap_or_else(|e| fail(e));
    let mut output = OutputConfig::new(kind).with_delimiter(args.delimiter);
    if let Some(dir) = &args.output_dir {
        output = output.with_output_directory(dir);
    }

    let timeout = match args.timeout_secs {
        Some(secs) if secs > 0.0 && secs.is_finite() => Some(Duration::from_secs_f64(secs)),
        Some(secs) => fail(format!("Timeout must be positive, got {}", secs)),
        None => None,
    };

    let integrator = Integrator::new(args.time_step)
        .with_tolerance(args.tolerance)
        .with_word_length(args.word_length)
        .with_workers(args.workers)
        .with_timeout(timeout);
    let mut integrator = match &args.engine {
        Some(program) => {
            info!("Engine: {} {:?}", program, args.engine_args);
            integrator.with_launcher(
                ProcessLauncher::new(program.clone()).with_args(args.engine_args.clone()),
            )
        }
        None => integrator.with_launcher(ReferenceLauncher::with_delimiter(args.delimiter)),
    };

    for cluster in clusters {
        let handler = output.build(&cluster).unwrap_or_else(|e| fail(e));
        integrator.add_cluster(cluster, handler);
    }

    let reports = integrator
        .evolve(args.duration)
        .await
        .unwrap_or_else(|e| fail(e));

    let total = reports.len();
    let failed_count = reports.iter().filter(|r| !r.is_success()).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "completed": total - failed_count,
            "failed": failed_count,
            "results": reports.iter().map(report_json).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(e),
        }
    } else {
        for (slot, report) in reports.iter().enumerate() {
            match &report.outcome {
                Ok(result) => info!(
                    "✓ [{}] {} ({} lines, {:.2?}): {}",
                    slot,
                    report.cluster,
                    report.lines,
                    report.elapsed,
                    describe(result)
                ),
                Err(e) => error!("✗ [{}] {} FAILED: {}", slot, report.cluster, e),
            }
        }

        if failed_count == 0 {
            info!("All {} cluster(s) evolved", total);
        } else {
            error!("{}/{} cluster(s) failed", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
