//! Cache of live backend connections.
//!
//! Connections are keyed by `address-username` and shared as
//! [`SharedClient`] handles. A handle closes its client when the last
//! reference goes away, so replacing or evicting a cache entry never
//! closes a connection another request is still using.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use kvkeeper_config::BackendConfig;
use kvkeeper_session::{EvictReason, EvictionHook, IdleCache, IdleConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Connector, Credential, KvClient, ROOT_USER};
use crate::error::{BackendError, Result, StoreError};

/// Owner of one backend client.
///
/// The client is closed exactly once, when the handle drops.
pub struct ClientHandle {
    client: Box<dyn KvClient>,
}

impl ClientHandle {
    pub fn new(client: Box<dyn KvClient>) -> Self {
        Self { client }
    }
}

impl Deref for ClientHandle {
    type Target = dyn KvClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        match self.client.close() {
            Ok(()) => debug!(
                host = %self.client.endpoint(),
                uname = %self.client.username(),
                "Backend connection closed"
            ),
            Err(e) => warn!(
                host = %self.client.endpoint(),
                uname = %self.client.username(),
                error = %e,
                "Failed to close backend connection"
            ),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("endpoint", &self.client.endpoint())
            .field("username", &self.client.username())
            .finish()
    }
}

/// Reference-counted backend connection.
pub type SharedClient = Arc<ClientHandle>;

/// Logs connections leaving the cache. The close itself happens when the
/// last borrower drops its handle.
struct ReleaseHook;

impl EvictionHook<String, SharedClient> for ReleaseHook {
    fn on_evict(&self, key: &String, value: SharedClient, reason: EvictReason) {
        let borrowers = Arc::strong_count(&value) - 1;
        debug!(key = %key, %reason, borrowers, "Connection left the cache");
    }
}

/// Idle-evicting cache of backend connections.
#[derive(Clone)]
pub struct ConnectionCache {
    cache: IdleCache<String, SharedClient>,
}

impl ConnectionCache {
    /// Create a cache closing connections idle for `config.idle_window`.
    pub fn new(config: IdleConfig) -> Self {
        Self {
            cache: IdleCache::with_hook(config, ReleaseHook),
        }
    }

    /// Look up a connection, refreshing its idle timer.
    pub fn resolve(&self, key: &str) -> Option<SharedClient> {
        self.cache.get(key)
    }

    /// Register a connection unless one is already cached under `key`.
    ///
    /// On rejection the connection is handed back; dropping it closes it
    /// unless it is shared elsewhere.
    pub fn register(&self, key: impl Into<String>, client: SharedClient) -> std::result::Result<(), SharedClient> {
        let key = key.into();
        match self.cache.set_if_absent(key.clone(), client) {
            Ok(()) => {
                debug!(key = %key, "Connection registered");
                Ok(())
            }
            Err(rejected) => {
                debug!(key = %key, "Connection already registered, rejecting");
                Err(rejected)
            }
        }
    }

    /// Cache a connection, releasing whatever was cached under `key`.
    pub fn replace(&self, key: impl Into<String>, client: SharedClient) {
        self.cache.set(key.into(), client);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// How long a connection may sit unused before it is closed.
    pub fn idle_window(&self) -> Duration {
        self.cache.config().idle_window
    }

    /// Evict idle connections now.
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    /// Start the background idle sweep.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.cache.spawn_sweeper(shutdown)
    }
}

/// Open a connection for `credential` and check that it is usable.
///
/// Anonymous and root connections are probed with an auth status query,
/// other users by reading their own roles, which fails when the
/// credentials are wrong.
pub async fn open_connection(
    connector: &dyn Connector,
    backend: &BackendConfig,
    credential: &Credential,
) -> Result<SharedClient> {
    let client = connector
        .connect(backend, credential)
        .await
        .map_err(|e| classify(&credential.address, e))?;
    let client = Arc::new(ClientHandle::new(client));

    let probe = if credential.username.is_empty() || credential.username == ROOT_USER {
        client.auth_status().await.map(|_| ())
    } else {
        client.user_roles(&credential.username).await.map(|_| ())
    };
    probe.map_err(|e| classify(&credential.address, e))?;

    debug!(host = %credential.address, uname = %credential.username, "Backend connection opened");
    Ok(client)
}

fn classify(address: &str, error: BackendError) -> StoreError {
    if error.is_rejection() {
        StoreError::AuthenticationFailure(error)
    } else {
        StoreError::ConnectionFailure {
            address: address.to_string(),
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryConnector};

    const KEY: &str = "mem-";

    fn handle(backend: &MemoryBackend) -> SharedClient {
        let client = backend
            .client("mem", &Credential::new("mem", "", ""))
            .unwrap();
        Arc::new(ClientHandle::new(Box::new(client)))
    }

    fn cache() -> ConnectionCache {
        ConnectionCache::new(IdleConfig::new(Duration::from_secs(60)))
    }

    #[test]
    fn test_replace_closes_previous_once() {
        let backend = MemoryBackend::default();
        let cache = cache();

        cache.replace(KEY, handle(&backend));
        cache.replace(KEY, handle(&backend));
        cache.replace(KEY, handle(&backend));

        assert_eq!(backend.opened_connections(), 3);
        assert_eq!(backend.closed_connections(), 2);
        assert_eq!(cache.len(), 1);

        drop(cache);
        assert_eq!(backend.closed_connections(), 3);
    }

    #[test]
    fn test_borrower_delays_close() {
        let backend = MemoryBackend::default();
        let cache = cache();
        cache.replace(KEY, handle(&backend));

        let borrowed = cache.resolve(KEY).unwrap();
        cache.replace(KEY, handle(&backend));
        assert_eq!(backend.closed_connections(), 0);

        drop(borrowed);
        assert_eq!(backend.closed_connections(), 1);
    }

    #[test]
    fn test_register_rejects_second_connection() {
        let backend = MemoryBackend::default();
        let cache = cache();

        assert!(cache.register(KEY, handle(&backend)).is_ok());
        let rejected = cache.register(KEY, handle(&backend)).unwrap_err();
        assert_eq!(backend.closed_connections(), 0);

        drop(rejected);
        assert_eq!(backend.closed_connections(), 1);
        assert_eq!(cache.keys(), vec![KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_closes_idle_connection() {
        let backend = MemoryBackend::default();
        let cache = ConnectionCache::new(IdleConfig::new(Duration::from_millis(20)));
        cache.replace(KEY, handle(&backend));

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
        assert_eq!(backend.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_open_connection_classifies_failures() {
        let backend = MemoryBackend::default();
        backend.add_user("root", "rootpw", &["root"]);
        backend.add_user("bob", "pw", &[]);
        backend.enable_auth();
        let connector = MemoryConnector::new().with_backend("mem", backend.clone());
        let config = BackendConfig::adhoc("mem");

        let ok = open_connection(&connector, &config, &Credential::new("mem", "bob", "pw"))
            .await
            .unwrap();
        assert_eq!(ok.username(), "bob");

        let bad = open_connection(&connector, &config, &Credential::new("mem", "bob", "nope")).await;
        assert!(matches!(bad, Err(StoreError::AuthenticationFailure(_))));

        let unknown = BackendConfig::adhoc("elsewhere:2379");
        let unreachable =
            open_connection(&connector, &unknown, &Credential::new("elsewhere:2379", "", "")).await;
        assert!(matches!(unreachable, Err(StoreError::ConnectionFailure { .. })));
    }
}
