//! Error types for the companion client

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Companion client errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Chat endpoint transport errors (connect, status, mid-stream read)
    #[error("chat transport error: {0}")]
    Transport(String),

    /// Speech synthesis endpoint errors
    #[error("speech synthesis error: {0}")]
    Speech(String),

    /// Audio decode or playback errors
    #[error("audio error: {0}")]
    Audio(String),

    /// Upload rejected at the boundary (non-image or malformed data URL)
    #[error("unsupported upload: {0}")]
    UnsupportedUpload(String),

    /// State store errors (pool, schema)
    #[error("state store error: {0}")]
    Database(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
