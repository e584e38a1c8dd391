// -----------------------------------------------------------------------------
// spring-bench - workload generator for key-value/document database runs
// -----------------------------------------------------------------------------

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spring_bench::config::{Config, WorkloadClass};
use spring_bench::counters::ShutdownReason;
use spring_bench::docs::DocGenerator;
use spring_bench::keys::KeyFormatter;
use spring_bench::metrics::print_aggregates;
use spring_bench::results_dir::ResultsDir;
use spring_bench::sink::JsonFileSink;
use spring_bench::store::MemoryConnector;
use spring_bench::tsv_export::TsvExporter;
use spring_bench::worker::n1ql;
use spring_bench::workload::{self, RunResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Builder as RtBuilder;
use tracing::{info, warn};

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "spring-bench", version, about = "Concurrent KV/query workload generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload from a config file
    ///
    /// Examples:
    ///   spring-bench run --config mixed.yaml
    ///   spring-bench run --config mixed.yaml --tsv --name nightly
    ///   spring-bench -vv run --config n1ql.yaml --results-dir /tmp/runs
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Base directory for the timestamped results directory
        #[arg(long, value_name = "DIR")]
        results_dir: Option<PathBuf>,

        /// Run name (defaults to results.name, then the config file stem)
        #[arg(long)]
        name: Option<String>,

        /// Also write <name>-results.tsv with one row per class and operation:
        /// class, operation, count, mean_us, p50_us, p90_us, p95_us, p99_us,
        /// max_us, ops_per_sec
        #[arg(long)]
        tsv: bool,

        /// Start from an empty in-memory store instead of loading `items` documents
        #[arg(long)]
        no_preload: bool,
    },
    /// Parse and validate a config file without running it
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spring_bench={}", level)));
    fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { config, results_dir, name, tsv, no_preload } => {
            run_workload(&config, results_dir.as_deref(), name.as_deref(), tsv, no_preload)?
        }
        Commands::Validate { config } => validate_cmd(&config)?,
    }

    Ok(())
}

fn validate_cmd(config_path: &Path) -> Result<()> {
    let config = Config::from_yaml_file(config_path)?;
    println!("Config OK: {}", config_path.display());
    print_plan(&config);
    Ok(())
}

fn print_plan(config: &Config) {
    let ws = &config.workload;
    println!("Target: {} (bucket {})", config.target.node, config.target.bucket);
    println!("Items: {}  Doc size: {} bytes", ws.items, ws.size);
    for class in WorkloadClass::ALL {
        let workers = ws.workers_for(class);
        if workers == 0 {
            continue;
        }
        println!(
            "  {:<16} workers={:<4} batch={:<5} throughput={:?}",
            class.name(),
            workers,
            ws.batch_size_for(class),
            ws.throughput_for(class)
        );
    }
    match ws.ops.limit() {
        Some(n) => println!("Ops target per class: {}", n),
        None => println!("Ops target per class: unbounded"),
    }
    if let Some(t) = config.timer {
        println!("Timer: {:?}", t);
    }
}

fn run_workload(
    config_path: &Path,
    results_base: Option<&Path>,
    name: Option<&str>,
    tsv: bool,
    no_preload: bool,
) -> Result<()> {
    info!("Loading workload configuration from: {}", config_path.display());
    let config = Config::from_yaml_file(config_path)?;
    println!("Running workload from: {}", config_path.display());
    print_plan(&config);

    let name = name.or(config.results.name.as_deref());
    let base = results_base.or(config.results.dir.as_deref());
    let mut results = ResultsDir::create(config_path, name, base)?;
    results.write_metadata()?;

    let connector = MemoryConnector::for_target(&config.target)
        .with_context(|| format!("No storage client for node '{}'", config.target.node))?;
    if !no_preload {
        let docs = DocGenerator::new(config.workload.size);
        let store = connector.store();
        store.preload(&KeyFormatter::new(config.target.prefix.clone()), &docs, config.workload.items);
        if config.workload.n1ql_workers > 0 {
            let fmt = KeyFormatter::new(n1ql::key_prefix(&config.target.prefix));
            store.preload(&fmt, &docs, config.workload.items);
        }
    }
    let sink = Arc::new(JsonFileSink::new(results.path()));

    let rt = RtBuilder::new_multi_thread().enable_all().build()?;
    let t0 = Instant::now();
    let outcome = rt.block_on(async {
        let handle = workload::start(&config, Arc::new(connector), sink)?;
        let signal = handle.shutdown_signal();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping workers");
                signal.trigger(ShutdownReason::Interrupt);
            }
        });
        let result = handle.await_completion().await;
        ctrl_c.abort();
        Ok::<_, anyhow::Error>(result)
    })?;
    let elapsed = t0.elapsed().as_secs_f64();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            results.finalize(elapsed, "failed")?;
            return Err(e).context("Workload failed");
        }
    };

    print_results(&result);
    results.write_summary(&result)?;
    if tsv || config.results.tsv {
        let path = TsvExporter::new(results.tsv_basename()).export_results(&result)?;
        println!("\nTSV results exported to: {}", path.display());
    }
    let outcome = match result.shutdown_reason {
        Some(ShutdownReason::Interrupt) => "interrupted",
        _ => "completed",
    };
    results.finalize(elapsed, outcome)?;
    println!("Results saved to: {}", results.path().display());
    Ok(())
}

fn print_results(result: &RunResult) {
    println!("\n=== Results ===");
    println!("Wall time: {:.2}s", result.wall_seconds);
    if let Some(reason) = result.shutdown_reason {
        println!("Stopped by: {:?}", reason);
    }
    for class in &result.classes {
        println!(
            "\n{}: {} ops ({} failed), {:.2} ops/s",
            class.class.name(),
            class.total_ops,
            class.failed_ops,
            class.ops_per_sec(result.wall_seconds)
        );
        for shard in &class.shards {
            let flush = shard
                .flush_error
                .as_deref()
                .map(|e| format!("  flush error: {}", e))
                .unwrap_or_default();
            println!(
                "  shard {:<3} {:<11} ops={:<10} failed={}{}",
                shard.sid, shard.state.to_string(), shard.completed_ops, shard.failed_ops, flush
            );
        }
        print_aggregates(class.class.name(), &class.ops);
    }
}
