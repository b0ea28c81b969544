//! Relay wire-protocol frames.
//!
//! Relays speak JSON arrays over the websocket: `["EVENT", <sub>, {...}]`
//! carries an event, `["EOSE", <sub>]` marks the end of stored history,
//! anything else is informational. A malformed frame is a fact about the
//! peer, not about us: it is counted and dropped, never an error.

use serde_json::Value;

use driftnet_core::{time::unix_now, Event};

/// One parsed relay frame.
#[derive(Debug)]
pub enum Frame {
    /// An event delivery.
    Event { sub_id: String, event: Event },
    /// End of stored history for a subscription; live events follow.
    EndOfStored { sub_id: String },
    /// A well-formed frame of some other type (`NOTICE`, `OK`, ...).
    Other(String),
    /// Not a JSON array, wrong arity, or an event payload that failed
    /// validation.
    Malformed,
}

/// Parse one websocket text message into a [`Frame`].
pub fn parse_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Frame::Malformed,
    };
    let Some(parts) = value.as_array() else {
        return Frame::Malformed;
    };
    let Some(kind) = parts.first().and_then(Value::as_str) else {
        return Frame::Malformed;
    };

    match kind {
        "EVENT" => {
            if parts.len() < 3 {
                return Frame::Malformed;
            }
            let sub_id = parts[1].as_str().unwrap_or_default().to_string();
            match Event::from_value(parts[2].clone()) {
                Ok(event) => Frame::Event { sub_id, event },
                Err(e) => {
                    tracing::debug!(error = %e, "dropping invalid event payload");
                    Frame::Malformed
                }
            }
        }
        "EOSE" => {
            let sub_id = parts
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Frame::EndOfStored { sub_id }
        }
        other => Frame::Other(other.to_string()),
    }
}

/// Seconds past which a creation timestamp is considered suspicious rather
/// than merely slow.
const STALE_WARN_SECS: i64 = 86_400;

/// Propagation delay in milliseconds between an event's claimed creation
/// time and its arrival, clamped to `[0, i32::MAX]`.
///
/// Events timestamped in the future floor to 0; a delta over a day gets a
/// warning, since it usually means a replayed archive or a broken relay
/// clock rather than propagation.
pub fn response_time_ms(created_at: i64, now: i64) -> i32 {
    let delta_secs = now - created_at;
    if delta_secs > STALE_WARN_SECS {
        tracing::warn!(created_at, delta_secs, "event is over a day old");
    }
    delta_secs
        .max(0)
        .saturating_mul(1000)
        .min(i64::from(i32::MAX)) as i32
}

/// [`response_time_ms`] against the wall clock.
pub fn response_time_ms_now(created_at: i64) -> i32 {
    response_time_ms(created_at, unix_now())
}
