//! Request logging middleware.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Log method, path, status and latency of every request.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration_ms = start.elapsed().as_millis();
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(%method, %path, status, %duration_ms, "Request completed with server error");
    } else if response.status().is_client_error() {
        tracing::warn!(%method, %path, status, %duration_ms, "Request completed with client error");
    } else {
        tracing::info!(%method, %path, status, %duration_ms, "Request completed");
    }

    response
}
