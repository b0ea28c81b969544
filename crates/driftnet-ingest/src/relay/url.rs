//! Relay URL normalization.
//!
//! One relay reachable as `Relay.One/`, `wss://relay.one` and
//! `wss://relay.one/` must count as one peer, both in the connection map and
//! in the relay filter of the query layer. Rules: default the scheme to
//! `wss://`, lowercase scheme and host, trim trailing slashes.

use url::Url;

/// Normalize a relay URL to its canonical form.
///
/// Best-effort: a string that does not parse as a URL at all is returned
/// scheme-prefixed but otherwise untouched, and left to fail at dial time
/// with a proper connection error.
pub fn normalize_relay_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        trimmed.to_string()
    } else {
        format!("wss://{trimmed}")
    };

    // Url::to_string lowercases the scheme and host and drops default ports.
    let mut normalized = match Url::parse(&with_scheme) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => with_scheme,
    };
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scheme_to_wss() {
        assert_eq!(normalize_relay_url("relay.one"), "wss://relay.one");
        assert_eq!(normalize_relay_url("ws://relay.one"), "ws://relay.one");
    }

    #[test]
    fn trims_trailing_slashes() {
        assert_eq!(normalize_relay_url("wss://relay.one/"), "wss://relay.one");
        assert_eq!(normalize_relay_url("wss://relay.one///"), "wss://relay.one");
    }

    #[test]
    fn lowercases_host_but_keeps_path() {
        assert_eq!(
            normalize_relay_url("wss://Relay.One/Nostr"),
            "wss://relay.one/Nostr"
        );
    }

    #[test]
    fn keeps_explicit_port() {
        assert_eq!(
            normalize_relay_url("ws://127.0.0.1:9001"),
            "ws://127.0.0.1:9001"
        );
    }

    #[test]
    fn variants_collapse_to_one_peer() {
        let canonical = normalize_relay_url("wss://relay.one");
        for variant in ["relay.one", "wss://Relay.One/", "wss://relay.one///"] {
            assert_eq!(normalize_relay_url(variant), canonical);
        }
    }
}
