//! Error types for `tether` core library.

use thiserror::Error;

/// Result type alias using `tether` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `tether` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// NDJSON line had valid JSON but an unexpected shape
    #[error("Failed to parse NDJSON: {0}")]
    NdjsonParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
