//! SQLite-backed persistence for events and their relay sightings.
//!
//! Writes are batched and idempotent: the event table conflicts on `id`,
//! the sources table on `(event_id, relay_url)`, and both inserts are
//! no-ops on conflict. A single engine-wide write lock serializes batch
//! writes and migrations; reads go straight to the pool.

pub mod query;

pub use query::{EventFilter, QueryResult, StoredEvent};

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::QueryBuilder;
use tokio::sync::{Mutex, OnceCell};

use driftnet_core::Event;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::processor::{EventStore, SourceRecord};

pub struct StorageEngine {
    database_url: String,
    min_connections: u32,
    max_connections: u32,
    init_retries: u32,
    init_retry_delay: Duration,
    pool: OnceCell<SqlitePool>,
    write_lock: Mutex<()>,
}

impl StorageEngine {
    pub fn new(database_url: impl Into<String>, config: &IngestConfig) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: config.db_min_connections,
            max_connections: config.db_max_connections,
            init_retries: config.db_init_retries,
            init_retry_delay: config.db_init_retry_delay,
            pool: OnceCell::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Open the pool and run pending migrations. Idempotent; every other
    /// method fails with [`Error::NotInitialized`] until this succeeds.
    pub async fn initialize(&self) -> Result<()> {
        self.pool
            .get_or_try_init(|| async {
                let pool = self.connect_with_retry().await?;
                let _guard = self.write_lock.lock().await;
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!(url = %self.database_url, "storage initialized");
                Ok::<_, Error>(pool)
            })
            .await?;
        Ok(())
    }

    async fn connect_with_retry(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match SqlitePoolOptions::new()
                .min_connections(self.min_connections)
                .max_connections(self.max_connections)
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => return Ok(pool),
                Err(e) if attempt < self.init_retries => {
                    tracing::warn!(
                        attempt,
                        retries = self.init_retries,
                        error = %e,
                        "database connect failed, retrying"
                    );
                    tokio::time::sleep(self.init_retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get().ok_or(Error::NotInitialized)
    }

    /// Insert a batch of events; rows whose id already exists are skipped.
    /// Returns the number of new rows.
    pub async fn store_events(&self, events: &[Event]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        let pool = self.pool()?;
        let _guard = self.write_lock.lock().await;

        let mut qb = QueryBuilder::new(
            "INSERT INTO events (id, pubkey, created_at, kind, content, sig, raw_data) ",
        );
        qb.push_values(events, |mut row, event| {
            row.push_bind(event.id.clone())
                .push_bind(event.pubkey.clone())
                // Same coercion the ingest boundary applies; a batch built
                // by hand cannot smuggle a negative timestamp past it.
                .push_bind(event.created_at.max(0))
                .push_bind(event.kind)
                .push_bind(event.content.clone())
                .push_bind(event.sig.clone())
                .push_bind(event.raw.to_string());
        });
        qb.push(" ON CONFLICT(id) DO NOTHING");

        let result = qb.build().execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Insert a batch of sightings. Rows referencing an event id that is
    /// not in the events table are silently dropped, and an existing
    /// (event, relay) pair is left untouched. Returns the number of new
    /// rows.
    pub async fn store_event_sources(&self, sources: &[SourceRecord]) -> Result<u64> {
        if sources.is_empty() {
            return Ok(0);
        }
        let pool = self.pool()?;
        let _guard = self.write_lock.lock().await;

        let mut qb = QueryBuilder::new(
            "WITH incoming (event_id, relay_url, first_seen_at, response_time_ms) AS (",
        );
        qb.push_values(sources, |mut row, source| {
            row.push_bind(source.event_id.clone())
                .push_bind(source.relay_url.clone())
                .push_bind(source.first_seen_at)
                .push_bind(source.response_time_ms.max(0));
        });
        qb.push(
            ") INSERT INTO event_sources (event_id, relay_url, first_seen_at, response_time_ms) \
             SELECT i.event_id, i.relay_url, i.first_seen_at, i.response_time_ms \
             FROM incoming i \
             WHERE EXISTS (SELECT 1 FROM events e WHERE e.id = i.event_id) \
             ON CONFLICT(event_id, relay_url) DO NOTHING",
        );

        let result = qb.build().execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// Relay URLs that delivered the given event, in first-seen order.
    pub async fn get_event_sources(&self, event_id: &str) -> Result<Vec<String>> {
        let pool = self.pool()?;
        let relays = sqlx::query_scalar::<_, String>(
            "SELECT relay_url FROM event_sources \
             WHERE event_id = ? ORDER BY first_seen_at, relay_url",
        )
        .bind(event_id)
        .fetch_all(pool)
        .await?;
        Ok(relays)
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> Result<i64> {
        let pool = self.pool()?;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl EventStore for StorageEngine {
    async fn store_events(&self, events: &[Event]) -> Result<u64> {
        StorageEngine::store_events(self, events).await
    }

    async fn store_event_sources(&self, sources: &[SourceRecord]) -> Result<u64> {
        StorageEngine::store_event_sources(self, sources).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) async fn temp_engine() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("events.db").display());
        let engine = StorageEngine::new(url, &IngestConfig::default());
        engine.initialize().await.unwrap();
        (dir, engine)
    }

    pub(crate) fn make_event(id: &str, pubkey: &str, created_at: i64, kind: i64, content: &str) -> Event {
        Event::from_value(json!({
            "id": id,
            "pubkey": pubkey,
            "created_at": created_at,
            "kind": kind,
            "content": content,
            "sig": "00",
            "tags": [["t", "news"]]
        }))
        .unwrap()
    }

    pub(crate) fn source(event_id: &str, relay: &str, seen: i64) -> SourceRecord {
        SourceRecord {
            event_id: event_id.to_string(),
            relay_url: relay.to_string(),
            first_seen_at: seen,
            response_time_ms: 25,
        }
    }

    #[tokio::test]
    async fn uninitialized_engine_fails_fast() {
        let engine = StorageEngine::new("sqlite://unused.db", &IngestConfig::default());
        let err = engine.store_events(&[]).await;
        assert!(err.is_ok(), "empty batch short-circuits");
        let err = engine
            .store_events(&[make_event("ev1", "aa", 1, 1, "x")])
            .await;
        assert!(matches!(err, Err(Error::NotInitialized)));
        assert!(matches!(
            engine.get_event_sources("ev1").await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (_dir, engine) = temp_engine().await;
        engine.initialize().await.unwrap();
        assert_eq!(engine.event_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storing_same_event_twice_is_a_noop() {
        let (_dir, engine) = temp_engine().await;
        let batch = vec![make_event("ev1", "aa", 100, 1, "hello")];

        assert_eq!(engine.store_events(&batch).await.unwrap(), 1);
        assert_eq!(engine.store_events(&batch).await.unwrap(), 0);
        assert_eq!(engine.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sources_accumulate_per_relay() {
        let (_dir, engine) = temp_engine().await;
        engine
            .store_events(&[make_event("ev1", "aa", 100, 1, "hello")])
            .await
            .unwrap();

        let stored = engine
            .store_event_sources(&[
                source("ev1", "wss://r1", 10),
                source("ev1", "wss://r2", 20),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        // Same pair again: no new row.
        let stored = engine
            .store_event_sources(&[source("ev1", "wss://r1", 99)])
            .await
            .unwrap();
        assert_eq!(stored, 0);

        let relays = engine.get_event_sources("ev1").await.unwrap();
        assert_eq!(relays, ["wss://r1", "wss://r2"]);
    }

    #[tokio::test]
    async fn orphan_sources_are_dropped() {
        let (_dir, engine) = temp_engine().await;
        engine
            .store_events(&[make_event("ev1", "aa", 100, 1, "hello")])
            .await
            .unwrap();

        // One real sighting, one referencing an event that was never stored.
        let stored = engine
            .store_event_sources(&[
                source("ev1", "wss://r1", 10),
                source("ghost", "wss://r1", 10),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert!(engine.get_event_sources("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_response_time_is_floored() {
        let (_dir, engine) = temp_engine().await;
        engine
            .store_events(&[make_event("ev1", "aa", 100, 1, "hello")])
            .await
            .unwrap();

        let mut record = source("ev1", "wss://r1", 10);
        record.response_time_ms = -5;
        engine.store_event_sources(&[record]).await.unwrap();

        let pool = engine.pool().unwrap();
        let ms: i32 = sqlx::query_scalar(
            "SELECT response_time_ms FROM event_sources WHERE event_id = 'ev1'",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        assert_eq!(ms, 0);
    }
}
