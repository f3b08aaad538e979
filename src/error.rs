//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Host lacks the capability (no recognizer, no synthesis engine)
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Microphone access denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Recognition session failure
    #[error("capture error: {0}")]
    Capture(String),

    /// A single synthesis provider failed
    #[error("provider error: {0}")]
    Provider(String),

    /// Every synthesis provider in the chain failed
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or decode error
    #[error("audio error: {0}")]
    Audio(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the user has to act (grant access, install an engine) before retrying
    #[must_use]
    pub const fn requires_user_action(&self) -> bool {
        matches!(self, Self::Permission(_) | Self::Unsupported(_))
    }
}
