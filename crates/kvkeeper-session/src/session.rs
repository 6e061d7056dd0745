//! Per-browser session storage.
//!
//! A [`SessionManager`] hands out [`SessionStore`]s keyed by an opaque
//! session id. Where the stores live is decided by the
//! [`SessionProvider`] passed in at construction; [`MemoryProvider`] keeps
//! them in an [`IdleCache`] so sessions nobody touched within their
//! lifetime are reclaimed by garbage collection.
//!
//! Each store guards its values with its own lock, separate from the
//! provider's structural lock, so one session's writes never wait on
//! another session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{IdleConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::idle::IdleCache;

/// Key/value bag belonging to one browser session.
#[derive(Debug)]
pub struct SessionStore {
    id: String,
    values: Mutex<HashMap<String, Value>>,
}

/// Shared handle to a session store.
pub type SharedSession = Arc<SessionStore>;

impl SessionStore {
    /// Create an empty store.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    /// The session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get a raw value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Get a value decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Set a raw value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    /// Encode `value` and store it under `key`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Remove a value, returning it if present.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.values.lock().remove(key)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Check if the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

/// Backing storage for sessions.
///
/// Implement this to keep sessions somewhere other than process memory.
pub trait SessionProvider: Send + Sync {
    /// Create and register an empty session under `sid`.
    fn init(&self, sid: &str) -> Result<SharedSession>;

    /// Fetch a session, refreshing its recency. `Ok(None)` when unknown.
    fn read(&self, sid: &str) -> Result<Option<SharedSession>>;

    /// Drop a session.
    fn destroy(&self, sid: &str) -> Result<()>;

    /// Reclaim expired sessions, returning how many were removed.
    fn gc(&self) -> usize;

    /// Number of live sessions.
    fn count(&self) -> usize;
}

/// In-memory session provider backed by an [`IdleCache`].
#[derive(Clone)]
pub struct MemoryProvider {
    sessions: IdleCache<String, SharedSession>,
}

impl MemoryProvider {
    /// Create a provider whose sessions expire after `config.idle_window`.
    pub fn new(config: IdleConfig) -> Self {
        Self {
            sessions: IdleCache::new(config),
        }
    }
}

impl SessionProvider for MemoryProvider {
    fn init(&self, sid: &str) -> Result<SharedSession> {
        let store = Arc::new(SessionStore::new(sid));
        self.sessions.set(sid.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn read(&self, sid: &str) -> Result<Option<SharedSession>> {
        Ok(self.sessions.get(sid))
    }

    fn destroy(&self, sid: &str) -> Result<()> {
        self.sessions.remove(sid);
        Ok(())
    }

    fn gc(&self) -> usize {
        self.sessions.sweep()
    }

    fn count(&self) -> usize {
        self.sessions.len()
    }
}

/// Result of [`SessionManager::start`].
#[derive(Debug, Clone)]
pub struct SessionStart {
    /// The session store for this request.
    pub store: SharedSession,

    /// True when a new session was allocated. The caller must hand the
    /// new id back to the browser (e.g. in a cookie).
    pub is_new: bool,
}

/// Allocates and resolves browser sessions.
#[derive(Clone)]
pub struct SessionManager {
    provider: Arc<dyn SessionProvider>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager over the given provider.
    pub fn new(config: SessionConfig, provider: impl SessionProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            config,
        }
    }

    /// Create a manager backed by a [`MemoryProvider`].
    pub fn in_memory(config: SessionConfig) -> Self {
        let provider = MemoryProvider::new(config.idle_config());
        Self::new(config, provider)
    }

    /// The manager configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Name of the cookie carrying the session id.
    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Resolve the session for a request.
    ///
    /// A known id returns its existing store; a missing or unknown id gets
    /// a freshly allocated session.
    pub fn start(&self, token: Option<&str>) -> Result<SessionStart> {
        if let Some(sid) = token.filter(|t| !t.is_empty()) {
            if let Some(store) = self.provider.read(sid)? {
                return Ok(SessionStart {
                    store,
                    is_new: false,
                });
            }
            debug!("Unknown session id presented, allocating a new session");
        }

        let sid = uuid::Uuid::new_v4().simple().to_string();
        let store = self.provider.init(&sid)?;
        debug!(session_id = %sid, "Session started");

        Ok(SessionStart {
            store,
            is_new: true,
        })
    }

    /// Look up an existing session without allocating one.
    pub fn find(&self, sid: &str) -> Result<SharedSession> {
        self.provider
            .read(sid)?
            .ok_or_else(|| Error::NotFound(sid.to_string()))
    }

    /// Destroy a session.
    pub fn destroy(&self, sid: &str) -> Result<()> {
        self.provider.destroy(sid)
    }

    /// Run one garbage collection pass.
    pub fn gc(&self) -> usize {
        let reclaimed = self.provider.gc();
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed expired sessions");
        }
        reclaimed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.provider.count()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start periodic garbage collection every `gc_interval`.
    pub fn spawn_gc(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let interval = self.config.gc_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                manager.gc();
            }
            debug!("Session garbage collection stopped");
        })
    }
}
