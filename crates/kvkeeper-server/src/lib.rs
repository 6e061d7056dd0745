//! HTTP API for browsing and editing key-value backends.
//!
//! The browser picks a configured backend, logs in through
//! `POST /v3/connect` and then reads and writes keys through the `/v3`
//! routes. The login lives in a cookie-identified session; the backend
//! connection lives in a shared, idle-evicting connection cache.
//!
//! # Example
//!
//! ```ignore
//! use kvkeeper_server::{AppState, Server, ServerConfig};
//!
//! let state = AppState::new(ServerConfig::new(), keeper_config, connector);
//! let shutdown = CancellationToken::new();
//! Server::new(state).run(shutdown).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod session;
pub mod state;

pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use session::{BrowserSession, Connected, Login, SessionCookie};
pub use state::AppState;

use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The kvkeeper HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .route("/hosts", get(routes::hosts_handler))
            .nest("/v3", Self::v3_routes())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                logging::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    fn v3_routes() -> Router<AppState> {
        Router::new()
            .route("/connect", post(routes::connect_handler))
            .route("/put", put(routes::put_handler))
            .route("/get", get(routes::get_handler))
            .route("/delete", post(routes::delete_handler))
            .route("/getpath", get(routes::getpath_handler))
    }

    /// Serve on the configured bind address until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr, shutdown).await
    }

    /// Serve on a specific address until `shutdown` is cancelled.
    pub async fn run_on(self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let router = self.router();
        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
