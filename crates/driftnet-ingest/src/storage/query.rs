//! Filtered event queries.
//!
//! Every filter field is optional and all present fields AND together.
//! Inclusion and exclusion variants exist for each predicate; `not_since`
//! and `not_until` invert the comparison direction rather than negating
//! set membership. Results are newest-first with the event id as a
//! deterministic tie-break, so pagination never duplicates or skips rows.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite};

use driftnet_core::keys::{normalize_pubkey, pubkey_to_npub};

use super::StorageEngine;
use crate::error::{Error, Result};
use crate::relay::normalize_relay_url;

pub const DEFAULT_QUERY_LIMIT: i64 = 100;
pub const MAX_QUERY_LIMIT: i64 = 1000;

/// Query predicates. All set fields must hold simultaneously.
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Author pubkey, hex or npub.
    pub pubkey: Option<String>,
    pub kind: Option<i64>,
    /// Only events sighted on this relay.
    pub relay: Option<String>,
    /// `(name, value)` pairs that must each appear as some tag's first two
    /// elements; one containment check per pair, all AND'd.
    pub tags: Vec<(String, String)>,
    /// Full-text match over content; whitespace-separated terms all match.
    pub q: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<i64>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<i64>,

    pub not_pubkey: Option<String>,
    pub not_kind: Option<i64>,
    /// Exclude events sighted on this relay, even once.
    pub not_relay: Option<String>,
    pub not_tags: Vec<(String, String)>,
    pub not_q: Option<String>,
    /// Inverted bound: only events strictly older than this.
    pub not_since: Option<i64>,
    /// Inverted bound: only events strictly newer than this.
    pub not_until: Option<i64>,

    /// Page size, 1..=1000.
    pub limit: i64,
    pub offset: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            pubkey: None,
            kind: None,
            relay: None,
            tags: Vec::new(),
            q: None,
            since: None,
            until: None,
            not_pubkey: None,
            not_kind: None,
            not_relay: None,
            not_tags: Vec::new(),
            not_q: None,
            not_since: None,
            not_until: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

impl EventFilter {
    /// Validate bounds and normalize pubkeys and relay URLs to the forms
    /// the store indexes.
    fn resolved(&self) -> Result<Self> {
        if !(1..=MAX_QUERY_LIMIT).contains(&self.limit) {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {MAX_QUERY_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.offset < 0 {
            return Err(Error::Validation(format!(
                "offset must be non-negative, got {}",
                self.offset
            )));
        }
        for kind in [self.kind, self.not_kind].into_iter().flatten() {
            if !(0..=65_535).contains(&kind) {
                return Err(Error::Validation(format!("kind out of range: {kind}")));
            }
        }

        let normalize_pk = |pk: &Option<String>| -> Result<Option<String>> {
            match pk {
                Some(raw) => normalize_pubkey(raw)
                    .map(Some)
                    .ok_or_else(|| Error::Validation(format!("invalid pubkey: {raw}"))),
                None => Ok(None),
            }
        };
        let normalize_q = |q: &Option<String>| {
            q.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            pubkey: normalize_pk(&self.pubkey)?,
            not_pubkey: normalize_pk(&self.not_pubkey)?,
            relay: self.relay.as_deref().map(normalize_relay_url),
            not_relay: self.not_relay.as_deref().map(normalize_relay_url),
            q: normalize_q(&self.q),
            not_q: normalize_q(&self.not_q),
            ..self.clone()
        })
    }
}

/// One event as the query surface returns it: typed fields plus the
/// derived npub and the relays that delivered it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: String,
    pub pubkey: String,
    pub npub: String,
    pub created_at: i64,
    pub kind: i64,
    pub content: String,
    pub sig: String,
    pub tags: Vec<Vec<String>>,
    /// Relay URLs that delivered this event, in first-seen order.
    pub relays: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<StoredEvent>,
    /// Matching events in total, ignoring limit and offset.
    pub total: i64,
}

impl StorageEngine {
    /// Run a filtered query: one page of enriched events plus the total
    /// match count.
    pub async fn query_events(&self, filter: &EventFilter) -> Result<QueryResult> {
        let pool = self.pool()?;
        let filter = filter.resolved()?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT e.id, e.pubkey, e.created_at, e.kind, e.content, e.sig, e.raw_data \
             FROM events e",
        );
        push_relay_join(&mut qb, &filter);
        push_predicates(&mut qb, &filter);
        qb.push(" ORDER BY e.created_at DESC, e.id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows = qb.build().fetch_all(pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(DISTINCT e.id) FROM events e");
        push_relay_join(&mut qb, &filter);
        push_predicates(&mut qb, &filter);
        let total: i64 = qb.build_query_scalar().fetch_one(pool).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let pubkey: String = row.try_get("pubkey")?;
            let raw_data: String = row.try_get("raw_data")?;
            events.push(StoredEvent {
                id: row.try_get("id")?,
                npub: pubkey_to_npub(&pubkey).unwrap_or_default(),
                pubkey,
                created_at: row.try_get("created_at")?,
                kind: row.try_get("kind")?,
                content: row.try_get("content")?,
                sig: row.try_get("sig")?,
                tags: tags_from_raw(&raw_data),
                relays: Vec::new(),
            });
        }
        self.attach_relays(&mut events).await?;

        Ok(QueryResult { events, total })
    }

    /// One batched lookup of the relay lists for a page of events.
    async fn attach_relays(&self, events: &mut [StoredEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT event_id, relay_url FROM event_sources WHERE event_id IN (",
        );
        let mut ids = qb.separated(", ");
        for event in events.iter() {
            ids.push_bind(event.id.clone());
        }
        qb.push(") ORDER BY first_seen_at, relay_url");

        let pairs: Vec<(String, String)> = qb.build_query_as().fetch_all(pool).await?;
        let mut by_id: HashMap<String, Vec<String>> = HashMap::new();
        for (event_id, relay_url) in pairs {
            by_id.entry(event_id).or_default().push(relay_url);
        }
        for event in events {
            if let Some(relays) = by_id.remove(&event.id) {
                event.relays = relays;
            }
        }
        Ok(())
    }
}

fn push_relay_join(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter) {
    if filter.relay.is_some() {
        qb.push(" LEFT JOIN event_sources s ON e.id = s.event_id");
    }
}

fn push_predicates(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EventFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(pubkey) = &filter.pubkey {
        qb.push(" AND e.pubkey = ").push_bind(pubkey.clone());
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND e.kind = ").push_bind(kind);
    }
    if let Some(relay) = &filter.relay {
        qb.push(" AND s.relay_url = ").push_bind(relay.clone());
    }
    for (name, value) in &filter.tags {
        qb.push(
            " AND EXISTS (SELECT 1 FROM json_each(e.raw_data, '$.tags') t \
             WHERE json_extract(t.value, '$[0]') = ",
        )
        .push_bind(name.clone())
        .push(" AND json_extract(t.value, '$[1]') = ")
        .push_bind(value.clone())
        .push(")");
    }
    if let Some(q) = &filter.q {
        qb.push(" AND e.rowid IN (SELECT rowid FROM events_fts WHERE events_fts MATCH ")
            .push_bind(fts_match(q))
            .push(")");
    }
    if let Some(ts) = filter.since {
        qb.push(" AND e.created_at >= ").push_bind(ts);
    }
    if let Some(ts) = filter.until {
        qb.push(" AND e.created_at <= ").push_bind(ts);
    }

    if let Some(pubkey) = &filter.not_pubkey {
        qb.push(" AND e.pubkey != ").push_bind(pubkey.clone());
    }
    if let Some(kind) = filter.not_kind {
        qb.push(" AND e.kind != ").push_bind(kind);
    }
    if let Some(relay) = &filter.not_relay {
        qb.push(" AND e.id NOT IN (SELECT event_id FROM event_sources WHERE relay_url = ")
            .push_bind(relay.clone())
            .push(")");
    }
    for (name, value) in &filter.not_tags {
        qb.push(
            " AND NOT EXISTS (SELECT 1 FROM json_each(e.raw_data, '$.tags') t \
             WHERE json_extract(t.value, '$[0]') = ",
        )
        .push_bind(name.clone())
        .push(" AND json_extract(t.value, '$[1]') = ")
        .push_bind(value.clone())
        .push(")");
    }
    if let Some(q) = &filter.not_q {
        qb.push(" AND e.rowid NOT IN (SELECT rowid FROM events_fts WHERE events_fts MATCH ")
            .push_bind(fts_match(q))
            .push(")");
    }
    // Inverted directions: "not newer than X" means strictly older.
    if let Some(ts) = filter.not_since {
        qb.push(" AND e.created_at < ").push_bind(ts);
    }
    if let Some(ts) = filter.not_until {
        qb.push(" AND e.created_at > ").push_bind(ts);
    }
}

/// Build an FTS5 match expression: each whitespace-separated term becomes
/// a quoted phrase, all terms required. Quoting keeps user input from
/// reaching the FTS5 query parser as syntax.
fn fts_match(q: &str) -> String {
    q.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tags_from_raw(raw: &str) -> Vec<Vec<String>> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| value.get("tags").cloned())
        .and_then(|tags| serde_json::from_value(tags).ok())
        .unwrap_or_default()
}
