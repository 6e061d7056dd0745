//! Error types for backend access.

use thiserror::Error;

/// Errors reported by a backend client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached or the transport could not be set up.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but refused the request (bad credentials,
    /// permission denied, unknown user).
    #[error("{0}")]
    Rejected(String),

    /// The request failed for another reason.
    #[error("request failed: {0}")]
    Request(String),

    /// The client was already closed.
    #[error("client is closed")]
    Closed,
}

impl BackendError {
    /// Whether the backend itself refused the request.
    ///
    /// Rejections mean the credentials or grants are wrong and the operator
    /// should be asked to log in again.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BackendError::Rejected(_))
    }
}

/// Result type for backend client calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors raised by the core store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or transport/auth setup failed.
    #[error("connect to {address} failed: {source}")]
    ConnectionFailure {
        address: String,
        #[source]
        source: BackendError,
    },

    /// Credentials rejected by the backend.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(#[source] BackendError),

    /// Role or permission metadata could not be read.
    #[error("get permission keys failed: {context}: {source}")]
    PermissionLookupFailure {
        context: String,
        #[source]
        source: BackendError,
    },

    /// One of the permitted ranges could not be queried.
    #[error("range get failed for '{from}': {source}")]
    RangeQueryFailure {
        from: String,
        #[source]
        source: BackendError,
    },

    /// A plain backend request failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    /// The underlying backend error.
    pub fn backend_error(&self) -> &BackendError {
        match self {
            StoreError::ConnectionFailure { source, .. }
            | StoreError::PermissionLookupFailure { source, .. }
            | StoreError::RangeQueryFailure { source, .. } => source,
            StoreError::AuthenticationFailure(source) | StoreError::Backend(source) => source,
        }
    }

    /// Whether the operator should be asked for credentials again.
    pub fn needs_login(&self) -> bool {
        matches!(self, StoreError::AuthenticationFailure(_)) || self.backend_error().is_rejection()
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
