//! Typed event record and ingestion-boundary validation.
//!
//! Relays deliver events as loose JSON objects. [`Event::from_value`] turns
//! one into a typed record at the ingestion boundary, keeping the original
//! payload alongside the typed fields so tag-containment queries can run
//! against the unmodified structure.

use serde_json::Value;

use crate::{Error, Result};

/// An immutable, identifier-addressed signed message.
///
/// The `id` uniquely determines all other fields; re-ingesting the same id
/// is a no-op at the storage layer. Signatures are carried as opaque hex,
/// not verified.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event identifier (64-char hex, content-addressed).
    pub id: String,
    /// Author public key (64-char hex).
    pub pubkey: String,
    /// Unix timestamp of creation, coerced to `>= 0` on ingest.
    pub created_at: i64,
    /// Kind number classifying the event's semantic type.
    pub kind: i64,
    /// Free-text content body.
    pub content: String,
    /// Schnorr signature over the event hash (opaque hex).
    pub sig: String,
    /// Ordered tag arrays, e.g. `[["e", "<id>"], ["p", "<pubkey>"]]`.
    pub tags: Vec<Vec<String>>,
    /// The full original payload, a superset of the typed fields.
    pub raw: Value,
}

impl Event {
    /// Validate a loose JSON payload into a typed event.
    ///
    /// A missing or non-string `id` is a hard error; everything else
    /// degrades softly the way the storage layer expects: a negative or
    /// non-integer `created_at` is coerced to 0 with a warning, missing
    /// string fields become empty, missing tags become an empty list.
    pub fn from_value(raw: Value) -> Result<Self> {
        let obj = raw.as_object().ok_or_else(|| Error::InvalidField {
            field: "event",
            reason: "payload is not a JSON object".to_string(),
        })?;

        let id = match obj.get("id").and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                return Err(Error::InvalidField {
                    field: "id",
                    reason: "missing or empty".to_string(),
                });
            }
        };

        let created_at = sanitize_created_at(obj.get("created_at"), &id);

        let tags = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_array)
                    .map(|tag| {
                        tag.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let str_field = |name: &str| {
            obj.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            pubkey: str_field("pubkey"),
            kind: obj.get("kind").and_then(Value::as_i64).unwrap_or(0),
            content: str_field("content"),
            sig: str_field("sig"),
            id,
            created_at,
            tags,
            raw,
        })
    }
}

/// Coerce a loose `created_at` value into a non-negative Unix timestamp.
///
/// Negative or non-integer values become 0 with a warning, never an error;
/// the storage layer applies the same rule so a bad timestamp can never be
/// rejected at one stage and accepted at another.
pub fn sanitize_created_at(value: Option<&Value>, event_id: &str) -> i64 {
    match value.and_then(Value::as_i64) {
        Some(ts) if ts >= 0 => ts,
        other => {
            tracing::warn!(
                event_id,
                value = ?value,
                coerced = ?other,
                "invalid created_at, using 0"
            );
            0
        }
    }
}
