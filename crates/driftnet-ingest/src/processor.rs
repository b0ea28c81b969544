//! Batching worker pool between the relay manager and storage.
//!
//! Relay peers push sightings into a bounded queue; a fixed pool of workers
//! drains it. Each worker accumulates a batch until it reaches the size cap
//! or the interval from the batch's first item elapses, then flushes it
//! through the process-wide dedup set into storage. Producers suspend when
//! the queue is full, so a slow database slows ingestion instead of growing
//! memory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use driftnet_core::{time::unix_now, Event};

use crate::config::IngestConfig;
use crate::error::{Error, Result};

/// One event sighting from one relay peer.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub event: Event,
    pub relay_url: String,
    pub response_time_ms: i32,
}

/// A per-relay sighting row, derived from an [`IngestItem`] at flush time.
///
/// Sightings are recorded for every item in a batch, including duplicates
/// of already-seen events: the event row is written once, but each relay
/// that delivered it gets its own source row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub event_id: String,
    pub relay_url: String,
    pub first_seen_at: i64,
    pub response_time_ms: i32,
}

/// Storage seam for the worker pool.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a batch of events; returns the number of new rows.
    async fn store_events(&self, events: &[Event]) -> Result<u64>;
    /// Persist a batch of sightings; returns the number of new rows.
    async fn store_event_sources(&self, sources: &[SourceRecord]) -> Result<u64>;
}

pub struct EventProcessor {
    tx: Sender<IngestItem>,
    rx: Receiver<IngestItem>,
    store: Arc<dyn EventStore>,
    seen: Arc<Mutex<HashSet<String>>>,
    batch_size: usize,
    batch_interval: Duration,
    worker_pool_size: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventProcessor {
    pub fn new(config: &IngestConfig, store: Arc<dyn EventStore>) -> Self {
        let (tx, rx) = async_channel::bounded(config.queue_capacity);
        Self {
            tx,
            rx,
            store,
            seen: Arc::new(Mutex::new(HashSet::new())),
            batch_size: config.event_batch_size,
            batch_interval: config.event_batch_interval,
            worker_pool_size: config.worker_pool_size,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent only in the sense that calling it
    /// twice doubles the pool; call once.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for id in 0..self.worker_pool_size {
            workers.push(tokio::spawn(worker(
                id,
                self.rx.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.seen),
                self.batch_size,
                self.batch_interval,
            )));
        }
        tracing::info!(workers = self.worker_pool_size, "event processor started");
    }

    /// Push one sighting into the queue, waiting while it is full.
    pub async fn enqueue(&self, item: IngestItem) -> Result<()> {
        self.tx.send(item).await.map_err(|_| Error::Shutdown)?;
        metrics::gauge!("driftnet_queue_depth").set(self.tx.len() as f64);
        Ok(())
    }

    /// Number of sightings currently queued.
    pub fn queue_len(&self) -> usize {
        self.tx.len()
    }

    /// Number of distinct event ids seen by this process.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Close the queue and join the workers, flushing in-flight batches.
    pub async fn shutdown(&self) {
        self.tx.close();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.await;
        }
        tracing::info!("event processor stopped");
    }
}

async fn worker(
    id: usize,
    rx: Receiver<IngestItem>,
    store: Arc<dyn EventStore>,
    seen: Arc<Mutex<HashSet<String>>>,
    batch_size: usize,
    batch_interval: Duration,
) {
    loop {
        // Block for the first item; the flush timer starts from it, not
        // from the previous flush.
        let first = match rx.recv().await {
            Ok(item) => item,
            Err(_) => break,
        };
        let deadline = Instant::now() + batch_interval;

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Ok(item)) => batch.push(item),
                // Channel closed or interval elapsed: flush what we have.
                Ok(Err(_)) | Err(_) => break,
            }
        }

        flush(store.as_ref(), &seen, batch).await;
    }
    tracing::debug!(worker = id, "batch worker stopped");
}

async fn flush(store: &dyn EventStore, seen: &Mutex<HashSet<String>>, batch: Vec<IngestItem>) {
    let now = unix_now();
    let mut events = Vec::new();
    let mut sources = Vec::with_capacity(batch.len());
    {
        // Partition under the dedup lock, then release it before touching
        // storage; the guard must not be held across an await.
        let mut seen = seen.lock();
        for item in batch {
            sources.push(SourceRecord {
                event_id: item.event.id.clone(),
                relay_url: item.relay_url,
                first_seen_at: now,
                response_time_ms: item.response_time_ms,
            });
            if seen.insert(item.event.id.clone()) {
                events.push(item.event);
            } else {
                metrics::counter!("driftnet_events_duplicate").increment(1);
            }
        }
    }

    // The two writes fail independently: a lost event batch must not drop
    // the sightings, the orphan filter in storage handles the gap.
    if !events.is_empty() {
        match store.store_events(&events).await {
            Ok(stored) => {
                metrics::counter!("driftnet_events_stored").increment(stored);
            }
            Err(e) => {
                tracing::error!(error = %e, count = events.len(), "event batch write failed");
            }
        }
    }
    if !sources.is_empty() {
        match store.store_event_sources(&sources).await {
            Ok(stored) => {
                metrics::counter!("driftnet_sources_stored").increment(stored);
            }
            Err(e) => {
                tracing::error!(error = %e, count = sources.len(), "source batch write failed");
            }
        }
    }
}
