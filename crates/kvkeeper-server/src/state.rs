//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use kvkeeper_config::{BackendConfig, KeeperConfig};
use kvkeeper_session::{IdleConfig, SessionConfig, SessionManager};
use kvkeeper_store::{ConnectionCache, Connector, PermissionResolver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Backends and lifetimes from the config file.
    pub keeper: Arc<KeeperConfig>,

    /// Opens backend connections.
    pub connector: Arc<dyn Connector>,

    /// Live backend connections keyed by `host-user`.
    pub connections: ConnectionCache,

    /// Browser sessions.
    pub sessions: SessionManager,

    /// Resolves which keys a connection may list.
    pub permissions: PermissionResolver,
}

impl AppState {
    /// Create state with in-memory sessions and lifetimes from `keeper`.
    pub fn new(
        config: ServerConfig,
        keeper: KeeperConfig,
        connector: impl Connector + 'static,
    ) -> Self {
        let settings = &keeper.session;
        let sessions = SessionManager::in_memory(
            SessionConfig::new()
                .with_cookie_name(settings.cookie_name.clone())
                .with_lifetime(Duration::from_secs(settings.lifetime_secs))
                .with_gc_interval(Duration::from_secs(settings.gc_interval_secs)),
        );
        let connections = ConnectionCache::new(IdleConfig::new(Duration::from_secs(
            settings.connection_idle_secs,
        )));

        Self {
            config: Arc::new(config),
            keeper: Arc::new(keeper),
            connector: Arc::new(connector),
            connections,
            sessions,
            permissions: PermissionResolver::new(),
        }
    }

    /// Replace the session manager.
    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = sessions;
        self
    }

    /// Replace the connection cache.
    pub fn with_connections(mut self, connections: ConnectionCache) -> Self {
        self.connections = connections;
        self
    }

    /// Settings for `host`, or defaults when it is not configured.
    pub fn backend_config(&self, host: &str) -> BackendConfig {
        self.keeper
            .lookup(host)
            .cloned()
            .unwrap_or_else(|| BackendConfig::adhoc(host))
    }

    /// Start the connection sweeper and the session garbage collector.
    pub fn spawn_background_tasks(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            connection_idle_secs = self.connections.idle_window().as_secs(),
            session_lifetime_secs = self.sessions.config().lifetime.as_secs(),
            "Starting background cache maintenance"
        );
        vec![
            self.connections.spawn_sweeper(shutdown.clone()),
            self.sessions.spawn_gc(shutdown.clone()),
        ]
    }
}
