//! Driftnet ingestion daemon.
//!
//! Connects to every relay in the config file, subscribes to their
//! firehose, and indexes each event with the set of relays that delivered
//! it. The relay list is re-read every 30 seconds, so peers can be added
//! or removed without a restart.
//!
//! # Usage
//!
//! ```bash
//! # Run against ./config.json and a local SQLite database
//! driftnet-ingest
//!
//! # Custom config and database locations
//! driftnet-ingest --config /etc/driftnet/relays.json \
//!     --database-url sqlite:///var/lib/driftnet/events.db
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT the daemon stops dialing relays, aborts the peer tasks,
//! drains the in-flight batches to storage, and exits with a summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use driftnet_ingest::config::FileRelaySource;
use driftnet_ingest::processor::EventStore;
use driftnet_ingest::relay::WsConnector;
use driftnet_ingest::{EventProcessor, IngestConfig, RelayManager, StorageEngine};

/// Driftnet ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "driftnet-ingest")]
#[command(about = "Relay event ingestion and indexing daemon")]
#[command(version)]
struct Args {
    /// Relay list config file ({"relays": [...]}), re-read while running
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/driftnet.db")]
    database_url: String,

    /// Capacity of the ingestion queue
    #[arg(long, default_value = "10000")]
    queue_capacity: usize,

    /// Number of batch workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Events per storage batch
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Max milliseconds a partial batch waits before flushing
    #[arg(long, default_value = "1000")]
    batch_interval_ms: u64,

    /// Consecutive failures before a relay's circuit opens
    #[arg(long, default_value = "5")]
    breaker_threshold: u32,

    /// Seconds an open circuit waits before probing again
    #[arg(long, default_value = "60")]
    breaker_recovery_secs: u64,

    /// Seconds between reconnect attempts to a relay
    #[arg(long, default_value = "5")]
    reconnect_delay_secs: u64,

    /// Seconds between relay-list reconciliations
    #[arg(long, default_value = "30")]
    reconcile_interval_secs: u64,
}

impl Args {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            queue_capacity: self.queue_capacity,
            worker_pool_size: self.workers,
            event_batch_size: self.batch_size,
            event_batch_interval: Duration::from_millis(self.batch_interval_ms),
            breaker_failure_threshold: self.breaker_threshold,
            breaker_recovery_timeout: Duration::from_secs(self.breaker_recovery_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            ..IngestConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("driftnet_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.ingest_config();

    tracing::info!("Driftnet ingestion daemon starting...");
    tracing::info!("  Config:   {}", args.config.display());
    tracing::info!("  Database: {}", args.database_url);
    tracing::info!(
        "  Workers: {}, batch: {} events / {}ms",
        config.worker_pool_size,
        config.event_batch_size,
        config.event_batch_interval.as_millis()
    );

    let db_parent = database_path(&args.database_url)
        .and_then(|p| p.parent().map(PathBuf::from))
        .filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = db_parent {
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let storage = Arc::new(StorageEngine::new(&args.database_url, &config));
    storage
        .initialize()
        .await
        .context("storage initialization failed")?;

    let processor = Arc::new(EventProcessor::new(
        &config,
        Arc::clone(&storage) as Arc<dyn EventStore>,
    ));
    processor.start();

    let source = Arc::new(FileRelaySource::new(&args.config));
    let manager = Arc::new(RelayManager::new(
        config,
        source,
        Arc::new(WsConnector),
        Arc::clone(&processor),
    ));

    let mut run = tokio::spawn(Arc::clone(&manager).run());

    let manager_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping gracefully...");
            manager.stop();
            (&mut run).await?
        }
        result = &mut run => result?,
    };
    manager_result.context("relay manager failed")?;

    tracing::info!("Draining event queue ({} pending)...", processor.queue_len());
    processor.shutdown().await;

    let stored = storage.event_count().await.unwrap_or(0);
    tracing::info!("Shutdown complete");
    tracing::info!("  Distinct events this run: {}", processor.seen_count());
    tracing::info!("  Events in database:       {}", stored);

    Ok(())
}

/// File path of a `sqlite://` URL, if it names one.
fn database_path(url: &str) -> Option<PathBuf> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Some(PathBuf::from(path))
}
