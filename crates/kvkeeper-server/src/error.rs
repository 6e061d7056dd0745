//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kvkeeper_store::{BackendError, StoreError};
use serde::Serialize;
use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The session has no live backend connection.
    #[error("Please connect to a backend first")]
    NotConnected,

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// A backend operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Session storage failed.
    #[error("Session error: {0}")]
    Session(#[from] kvkeeper_session::Error),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BackendError> for ServerError {
    fn from(e: BackendError) -> Self {
        ServerError::Store(StoreError::Backend(e))
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// HTTP status code.
    pub error_code: u16,
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::NotConnected => (StatusCode::UNAUTHORIZED, "not_connected"),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::Store(e) if e.needs_login() => (StatusCode::FORBIDDEN, "permission_denied"),
            ServerError::Store(StoreError::ConnectionFailure { .. }) => {
                (StatusCode::BAD_GATEWAY, "backend_unavailable")
            }
            ServerError::Store(_) => (StatusCode::BAD_GATEWAY, "backend_error"),
            ServerError::Session(_) => (StatusCode::INTERNAL_SERVER_ERROR, "session_error"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        match &self {
            ServerError::Internal(_) | ServerError::Session(_) => {
                tracing::error!(status = %status, code, error = %message, "Server error");
            }
            _ => {
                tracing::warn!(status = %status, code, error = %message, "Request failed");
            }
        }

        let body = ErrorResponse {
            error_code: status.as_u16(),
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
