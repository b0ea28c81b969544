//! Relay ingestion pipeline and storage engine for the driftnet indexer.
//!
//! The pipeline is three stages connected by a bounded queue:
//!
//! - [`relay`] maintains one long-lived subscription per configured peer,
//!   guarded by a per-peer [`breaker::CircuitBreaker`], and pushes every
//!   received event into the processor's queue.
//! - [`processor`] drains the queue with a worker pool, deduplicates by
//!   event id within the process, and writes batches to storage.
//! - [`storage`] persists events and per-relay sightings idempotently in
//!   SQLite and serves the filtered query surface.

pub mod breaker;
pub mod config;
pub mod error;
pub mod processor;
pub mod relay;
pub mod storage;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processor::EventProcessor;
pub use relay::RelayManager;
pub use storage::StorageEngine;
