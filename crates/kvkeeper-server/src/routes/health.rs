//! Health check endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Live browser sessions.
    pub sessions: usize,
    /// Cached backend connections.
    pub connections: usize,
}

/// Liveness probe.
pub async fn ping() -> &'static str {
    "pong"
}

/// Health check with cache sizes.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.sessions.len(),
        connections: state.connections.len(),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use kvkeeper_config::KeeperConfig;
    use kvkeeper_store::MemoryConnector;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState::new(
            ServerConfig::new(),
            KeeperConfig::default(),
            MemoryConnector::new(),
        );
        health_routes().with_state(state)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
        assert_eq!(health.sessions, 0);
        assert_eq!(health.connections, 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let response = app()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"pong");
    }
}
