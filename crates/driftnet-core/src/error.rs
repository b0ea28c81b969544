//! Error types for the driftnet core model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating or converting event data.
#[derive(Error, Debug)]
pub enum Error {
    /// Event payload has an invalid or missing field.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hex decoding error.
    #[error("hex decode error: {0}")]
    HexDecode(String),

    /// Bech32 encoding/decoding error.
    #[error("bech32 error: {0}")]
    Bech32(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = Error::InvalidField {
            field: "id",
            reason: "missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("id"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }
}
