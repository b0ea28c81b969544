//! Core types for the driftnet indexer.
//!
//! This crate holds everything that is pure data or pure conversion:
//!
//! - [`event`] - the typed event record and its ingestion-boundary validation
//! - [`keys`] - pubkey hex/bech32 conversions (derived on read, never stored)
//! - [`time`] - time-filter string parsing for the query boundary
//!
//! The stateful pipeline (relay connections, batching, storage) lives in
//! `driftnet-ingest`.

pub mod error;
pub mod event;
pub mod keys;
pub mod time;

pub use error::{Error, Result};
pub use event::Event;
