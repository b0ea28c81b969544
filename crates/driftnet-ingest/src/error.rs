//! Error types for the driftnet ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the ingestion and storage pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Event model or conversion error.
    #[error(transparent)]
    Core(#[from] driftnet_core::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (bad file, empty relay list).
    #[error("configuration error: {0}")]
    Config(String),

    /// Client-visible validation error at the query boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// The storage engine was used before `initialize()`.
    #[error("storage engine not initialized")]
    NotInitialized,

    /// The processing queue has been shut down.
    #[error("event processor is shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_display() {
        let err = Error::Config("no relays configured".to_string());
        assert!(err.to_string().contains("no relays configured"));
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_validation_display() {
        let err = Error::Validation("limit must be between 1 and 1000".to_string());
        assert!(err.to_string().contains("validation error"));
    }

    #[test]
    fn test_from_core_error() {
        let core = driftnet_core::Error::HexDecode("bad hex".to_string());
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
    }
}
