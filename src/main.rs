//! Command-line interface for shard-churn
//!
//! # Usage Examples
//!
//! ## Churn
//! ```bash
//! # Insert/update/delete cycles over the six churn collections.
//! # Send SIGUSR2 to stop after the current phase.
//! shard-churn churn --uri mongodb://mongos:27017 --database test
//! ```
//!
//! ## Worker Pool
//! ```bash
//! # 100 workers issuing $sampleRate updates, ops/sec logged every second
//! shard-churn workers --uri mongodb://mongos:27017 --collection churn
//!
//! # Sampled bulk updates
//! shard-churn workers --mode bulk --bulk-size 500 --workers 50
//! ```
//!
//! ## Prepare
//! ```bash
//! # Create and shard the churn collections, pre-splitting custom-id ones
//! shard-churn prepare --uri mongodb://mongos:27017 --database test
//! ```
//!
//! ## Load
//! ```bash
//! # Fill every churn collection to its shard-derived size
//! shard-churn load --uri mongodb://mongos:27017 --database test
//! ```
//!
//! Logging is controlled with `RUST_LOG` (e.g. `RUST_LOG=churn_mongodb=debug`).

use anyhow::Context;
use churn_core::{CollectionConfig, StopFlag, ThroughputCounter};
use churn_mongodb::{
    prepare_collections, shard_names, ChurnConfig, ChurnDriver, ConnectionArgs, DataSizing,
    InitialLoader, LoadConfig, MongoBackend, WorkerPool, WorkerPoolConfig, WorkersArgs,
};
use clap::{Parser, Subcommand};
use shard_churn::{install_stop_handler, parse_interval, ThroughputReporter};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "shard-churn")]
#[command(about = "Synthetic write churn for sharded MongoDB clusters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert, update and delete back to baseline, cycling over collections
    Churn(ConnectionArgs),
    /// Run a pool of concurrent update workers and report ops/sec
    Workers(WorkersArgs),
    /// Create and shard the churn collections
    Prepare(ConnectionArgs),
    /// Fill the churn collections to their shard-derived size
    Load(ConnectionArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing, defaulting to info when RUST_LOG is unset
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Churn(connection) => run_churn(connection).await,
        Commands::Workers(args) => run_workers(args).await,
        Commands::Prepare(connection) => run_prepare(connection).await,
        Commands::Load(connection) => run_load(connection).await,
    }
}

async fn connect(connection: &ConnectionArgs) -> anyhow::Result<MongoBackend> {
    MongoBackend::connect(&connection.uri, &connection.database)
        .await
        .with_context(|| format!("Failed to connect to MongoDB at {}", connection.uri))
}

async fn run_churn(connection: ConnectionArgs) -> anyhow::Result<()> {
    let backend = Arc::new(connect(&connection).await?);
    let stop = StopFlag::new();
    install_stop_handler(stop.clone()).context("Failed to install signal handler")?;

    let mut driver = ChurnDriver::initialize(backend, ChurnConfig::default(), stop)
        .await
        .context("Failed to initialize churn driver")?;
    let summary = driver.run().await;

    info!(
        "Churn finished: {} cycles completed, {} abandoned, {} inserted, {} deleted",
        summary.cycles_completed, summary.cycles_abandoned, summary.inserted, summary.deleted
    );
    Ok(())
}

async fn run_workers(args: WorkersArgs) -> anyhow::Result<()> {
    let interval = parse_interval(&args.report_interval)
        .with_context(|| format!("Invalid --report-interval: {}", args.report_interval))?;
    let config = WorkerPoolConfig::from(&args);
    config.validate().context("Invalid worker pool configuration")?;

    let backend = Arc::new(connect(&args.connection).await?);
    let stop = StopFlag::new();
    install_stop_handler(stop.clone()).context("Failed to install signal handler")?;

    let counter = ThroughputCounter::new();
    let reporter = ThroughputReporter::new(counter.clone(), interval).start();

    let summary = WorkerPool::new(backend, config, counter, stop)
        .run()
        .await
        .context("Worker pool failed")?;
    let reported = reporter.finish().await?;

    info!(
        "Workers finished: {} documents modified ({} reported), {:.1} ops/sec average",
        summary.modified,
        reported,
        summary.ops_per_second()
    );
    Ok(())
}

async fn run_prepare(connection: ConnectionArgs) -> anyhow::Result<()> {
    let backend = connect(&connection).await?;
    prepare_collections(
        &backend,
        &connection.database,
        &CollectionConfig::default_set(),
    )
    .await
    .context("Failed to prepare collections")?;

    info!("Collections prepared in {}", connection.database);
    Ok(())
}

async fn run_load(connection: ConnectionArgs) -> anyhow::Result<()> {
    let backend = Arc::new(connect(&connection).await?);
    let stop = StopFlag::new();
    install_stop_handler(stop.clone()).context("Failed to install signal handler")?;

    let config = LoadConfig::default();
    let shards = shard_names(backend.as_ref())
        .await
        .context("Failed to list shards")?;
    let sizing = DataSizing::new(shards.len(), config.collections.len())
        .context("Cannot size collections")?;

    let summary = InitialLoader::new(backend, config, sizing, stop)?
        .run()
        .await
        .context("Initial load failed")?;

    info!(
        "Load finished: {} documents in {} batches, {} failed batches, complete: {}",
        summary.inserted, summary.batches, summary.failed_batches, summary.complete
    );
    Ok(())
}
