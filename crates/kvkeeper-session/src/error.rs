//! Error types for session operations.

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session was not found by the provider.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Error reported by a session provider.
    #[error("Session provider error: {0}")]
    Provider(String),

    /// A session value could not be converted to or from its stored form.
    #[error("Session value error: {0}")]
    Value(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;
