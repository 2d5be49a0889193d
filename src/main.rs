//! Command-line interface for seriesload.
//!
//! Reads a serialized point stream from a file or stdin and drives the
//! concurrent load pipeline against the built-in in-memory backend.
//!
//! ```bash
//! # 8 workers over a shared queue
//! seriesload --file data.txt --workers 8
//!
//! # Entity-hashed sharding, one queue per worker
//! seriesload --file data.txt --workers 8 --hash-workers
//!
//! # Measure decode/batch overhead without writes
//! seriesload --file data.txt --dry-run --json
//! ```

use anyhow::Context;
use clap::Parser;
use load_core::{LoadConfig, LoadRunner};
use seriesload::memory::MemoryTarget;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "seriesload")]
#[command(about = "Database-agnostic load-testing harness for time-series bulk ingestion")]
struct Cli {
    /// Input file in the benchmark wire format (defaults to stdin)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Database name to load into
    #[arg(long, default_value = "benchmark", env = "SERIESLOAD_DB_NAME")]
    db_name: String,

    /// Number of parallel workers
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Points per batch
    #[arg(long, default_value = "10000")]
    batch_size: usize,

    /// Batches buffered per queue before the producer blocks
    #[arg(long, default_value = "8")]
    queue_depth: usize,

    /// Consistently hash each entity's points to the same worker queue
    #[arg(long)]
    hash_workers: bool,

    /// Dry run mode - decode and batch without backend writes
    #[arg(long)]
    dry_run: bool,

    /// Load into an existing database, skipping bootstrap
    #[arg(long)]
    skip_db_create: bool,

    /// Abort when the target database already exists
    #[arg(long)]
    abort_on_exist: bool,

    /// Log per-batch timing at debug level
    #[arg(long)]
    log_batches: bool,

    /// Seconds between progress reports (0 disables)
    #[arg(long, default_value = "10")]
    reporting_period: u64,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = LoadConfig::new(&cli.db_name)
        .with_workers(cli.workers)
        .with_batch_size(cli.batch_size)
        .with_queue_depth(cli.queue_depth)
        .with_do_load(!cli.dry_run)
        .with_do_create_db(!cli.skip_db_create)
        .with_abort_on_exist(cli.abort_on_exist)
        .with_log_batches(cli.log_batches)
        .with_reporting_period(Duration::from_secs(cli.reporting_period));
    if cli.hash_workers {
        config = config.with_hash_workers();
    }

    let runner = LoadRunner::new(config).context("invalid pipeline configuration")?;
    let target = MemoryTarget::new();

    let report = match &cli.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input file {}", path.display()))?;
            runner.run(&target, BufReader::new(file)).await?
        }
        None => runner.run(&target, BufReader::new(tokio::io::stdin())).await?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}
