//! Runtime configuration and the relay-list source.
//!
//! Tuning knobs live in [`IngestConfig`]; the set of relay peers comes from
//! a [`RelaySource`], which the relay manager re-reads periodically so the
//! peer set can change without a restart.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Capacity of the bounded ingestion queue.
    pub queue_capacity: usize,
    /// Number of worker tasks draining the queue.
    pub worker_pool_size: usize,
    /// Maximum events per storage batch.
    pub event_batch_size: usize,
    /// Maximum time a partial batch waits after its first event.
    pub event_batch_interval: Duration,
    /// Consecutive failures before a peer's circuit opens.
    pub breaker_failure_threshold: u32,
    /// Time an open circuit waits before allowing a probe.
    pub breaker_recovery_timeout: Duration,
    /// Delay between reconnect attempts to a peer.
    pub reconnect_delay: Duration,
    /// Interval between relay-list reconciliations.
    pub reconcile_interval: Duration,
    /// Minimum connections held by the database pool.
    pub db_min_connections: u32,
    /// Maximum connections held by the database pool.
    pub db_max_connections: u32,
    /// Attempts made to open the database before giving up.
    pub db_init_retries: u32,
    /// Delay between database open attempts.
    pub db_init_retry_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            worker_pool_size: 4,
            event_batch_size: 100,
            event_batch_interval: Duration::from_secs(1),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(30),
            db_min_connections: 1,
            db_max_connections: 10,
            db_init_retries: 3,
            db_init_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Where the relay manager gets its peer list.
#[async_trait]
pub trait RelaySource: Send + Sync {
    /// Return the current set of relay URLs.
    ///
    /// An empty set is an error: a running indexer with nothing to index is
    /// a misconfiguration, not a valid state.
    async fn relays(&self) -> Result<HashSet<String>>;
}

#[derive(Debug, Deserialize)]
struct RelayFile {
    relays: Vec<String>,
}

/// Relay list backed by a JSON file of the form `{"relays": [...]}`.
///
/// The file's mtime is checked on every read; the parsed list is cached
/// between changes so the reconcile loop doesn't re-parse an unchanged file
/// every 30 seconds.
pub struct FileRelaySource {
    path: PathBuf,
    cache: Mutex<Option<(SystemTime, HashSet<String>)>>,
}

impl FileRelaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    fn load(&self) -> Result<HashSet<String>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let parsed: RelayFile = serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("cannot parse {}: {e}", self.path.display()))
        })?;
        let relays: HashSet<String> = parsed
            .relays
            .into_iter()
            .map(|u| crate::relay::normalize_relay_url(&u))
            .collect();
        if relays.is_empty() {
            return Err(Error::Config(format!(
                "no relays configured in {}",
                self.path.display()
            )));
        }
        Ok(relays)
    }
}

#[async_trait]
impl RelaySource for FileRelaySource {
    async fn relays(&self) -> Result<HashSet<String>> {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::Config(format!("cannot stat {}: {e}", self.path.display())))?;

        if let Some((cached_mtime, cached)) = self.cache.lock().as_ref() {
            if *cached_mtime == mtime {
                return Ok(cached.clone());
            }
        }

        let relays = self.load()?;
        tracing::info!(
            path = %self.path.display(),
            count = relays.len(),
            "relay list loaded"
        );
        *self.cache.lock() = Some((mtime, relays.clone()));
        Ok(relays)
    }
}
