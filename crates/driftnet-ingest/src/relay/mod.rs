//! Relay peer management.
//!
//! One long-lived task per configured relay. Each task dials, subscribes,
//! and pumps frames into the processor queue until the connection drops,
//! then waits out the reconnect delay and tries again, gated by its own
//! circuit breaker. A reconciliation loop re-reads the relay source every
//! 30 seconds and spawns or aborts peer tasks to match; connected peers are
//! never disturbed by reconciliation.

pub mod connection;
pub mod frame;
pub mod url;

pub use connection::{RelayConnection, RelayConnector, WsConnector, SUBSCRIPTION_ID};
pub use frame::{parse_frame, Frame};
pub use url::normalize_relay_url;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;
use crate::config::{IngestConfig, RelaySource};
use crate::error::Result;
use crate::processor::{EventProcessor, IngestItem};

pub struct RelayManager {
    config: IngestConfig,
    source: Arc<dyn RelaySource>,
    connector: Arc<dyn RelayConnector>,
    processor: Arc<EventProcessor>,
    running: AtomicBool,
    peers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RelayManager {
    pub fn new(
        config: IngestConfig,
        source: Arc<dyn RelaySource>,
        connector: Arc<dyn RelayConnector>,
        processor: Arc<EventProcessor>,
    ) -> Self {
        Self {
            config,
            source,
            connector,
            processor,
            running: AtomicBool::new(false),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of peer tasks currently alive.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Run until [`stop`](Self::stop): reconcile the peer set against the
    /// relay source, then again every reconcile interval.
    ///
    /// A failed initial reconciliation is fatal (an indexer with no relays
    /// is misconfigured); later failures keep the current peer set and log.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.reconcile().await?;

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(self.config.reconcile_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.reconcile().await {
                tracing::error!(error = %e, "relay reconciliation failed, keeping current peers");
            }
        }
        Ok(())
    }

    /// Stop the reconcile loop and abort all peer tasks.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut peers = self.peers.lock();
        for (relay, handle) in peers.drain() {
            handle.abort();
            tracing::debug!(%relay, "peer task aborted");
        }
        tracing::info!("relay manager stopped");
    }

    async fn reconcile(self: &Arc<Self>) -> Result<()> {
        let desired = self.source.relays().await?;

        let mut peers = self.peers.lock();
        let current: Vec<String> = peers.keys().cloned().collect();
        for relay in current {
            if !desired.contains(&relay) {
                if let Some(handle) = peers.remove(&relay) {
                    handle.abort();
                    tracing::info!(%relay, "relay removed from config, peer dropped");
                }
            }
        }
        // A finished task means the peer loop bailed; respawn below.
        peers.retain(|_, handle| !handle.is_finished());

        for relay in desired {
            peers.entry(relay.clone()).or_insert_with(|| {
                tracing::info!(%relay, "starting peer task");
                tokio::spawn(Arc::clone(self).peer_loop(relay))
            });
        }

        metrics::gauge!("driftnet_relay_peers").set(peers.len() as f64);
        Ok(())
    }

    async fn peer_loop(self: Arc<Self>, relay: String) {
        let mut breaker = CircuitBreaker::new(
            self.config.breaker_failure_threshold,
            self.config.breaker_recovery_timeout,
        );

        while self.running.load(Ordering::SeqCst) {
            if breaker.allow_request() {
                match self.connector.connect(&relay).await {
                    Ok(mut conn) => {
                        breaker.record_success();
                        metrics::counter!("driftnet_relay_connects").increment(1);
                        tracing::info!(%relay, "connected and subscribed");
                        if let Err(e) = self.pump(conn.as_mut(), &relay).await {
                            tracing::warn!(%relay, error = %e, "connection lost");
                        } else {
                            tracing::info!(%relay, "peer closed the connection");
                        }
                        conn.close().await;
                    }
                    Err(e) => {
                        breaker.record_failure();
                        metrics::counter!("driftnet_relay_connect_failures").increment(1);
                        tracing::warn!(%relay, error = %e, "connect failed");
                    }
                }
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Forward frames from one connection into the processor queue until
    /// the peer closes or the transport errors.
    async fn pump(&self, conn: &mut dyn RelayConnection, relay: &str) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            let Some(text) = conn.next_text().await? else {
                return Ok(());
            };
            match frame::parse_frame(&text) {
                Frame::Event { event, .. } => {
                    metrics::counter!("driftnet_events_received").increment(1);
                    let item = IngestItem {
                        response_time_ms: frame::response_time_ms_now(event.created_at),
                        relay_url: relay.to_string(),
                        event,
                    };
                    // Suspends while the queue is full: backpressure reaches
                    // all the way to the socket.
                    self.processor.enqueue(item).await?;
                }
                Frame::EndOfStored { sub_id } => {
                    tracing::debug!(%relay, sub_id, "end of stored history");
                }
                Frame::Other(kind) => {
                    tracing::debug!(%relay, kind, "ignoring frame");
                }
                Frame::Malformed => {
                    metrics::counter!("driftnet_frames_malformed").increment(1);
                    tracing::debug!(%relay, "malformed frame dropped");
                }
            }
        }
        Ok(())
    }
}
