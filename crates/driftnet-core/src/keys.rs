//! Pubkey format conversions.
//!
//! Public keys are stored and indexed as lowercase hex; the bech32 `npub`
//! form is a human-readable encoding derived on read. These helpers sit at
//! the query boundary: callers may pass either form, the store only ever
//! sees hex.

use bech32::{Bech32, Hrp};

use crate::{Error, Result};

const NPUB_HRP: &str = "npub";

/// Accept a pubkey in hex or `npub` form and normalize it to lowercase hex.
///
/// Returns `None` for anything that is neither a 64-char hex string nor a
/// decodable 32-byte `npub`.
pub fn normalize_pubkey(pubkey: &str) -> Option<String> {
    if pubkey.is_empty() {
        return None;
    }

    if pubkey.len() == 64 && pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(pubkey.to_ascii_lowercase());
    }

    if pubkey.starts_with(NPUB_HRP) {
        let (hrp, data) = bech32::decode(pubkey).ok()?;
        if hrp.as_str() != NPUB_HRP || data.len() != 32 {
            return None;
        }
        return Some(hex::encode(data));
    }

    None
}

/// Encode a hex pubkey as a bech32 `npub` string.
pub fn pubkey_to_npub(hex_pubkey: &str) -> Result<String> {
    let bytes = hex::decode(hex_pubkey).map_err(|e| Error::HexDecode(e.to_string()))?;
    let hrp = Hrp::parse(NPUB_HRP).map_err(|e| Error::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|e| Error::Bech32(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf";

    #[test]
    fn hex_round_trips_through_npub() {
        let npub = pubkey_to_npub(HEX).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(normalize_pubkey(&npub).as_deref(), Some(HEX));
    }

    #[test]
    fn hex_input_is_lowercased() {
        let upper = HEX.to_ascii_uppercase();
        assert_eq!(normalize_pubkey(&upper).as_deref(), Some(HEX));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(normalize_pubkey(""), None);
        assert_eq!(normalize_pubkey("not a key"), None);
        // Right length, wrong alphabet.
        assert_eq!(normalize_pubkey(&"zz".repeat(32)), None);
        // npub prefix, broken checksum.
        assert_eq!(normalize_pubkey("npub1invalidchecksum"), None);
    }

    #[test]
    fn npub_to_hex_rejects_wrong_hrp() {
        let hrp = Hrp::parse("nsec").unwrap();
        let nsec = bech32::encode::<Bech32>(hrp, &[0u8; 32]).unwrap();
        assert_eq!(normalize_pubkey(&nsec), None);
    }

    #[test]
    fn encode_rejects_bad_hex() {
        assert!(pubkey_to_npub("zzzz").is_err());
    }
}
