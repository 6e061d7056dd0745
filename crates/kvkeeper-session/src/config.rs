//! Configuration for idle caches and session management.

use std::time::Duration;

/// Default idle window for cached backend connections (63 minutes).
///
/// Slightly longer than the default session lifetime so a connection
/// outlives the session that opened it.
pub const DEFAULT_CONNECTION_IDLE: Duration = Duration::from_secs(3780);

/// Default session lifetime (1 hour).
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(3600);

/// Default interval between session garbage collection passes (1 day).
pub const DEFAULT_SESSION_GC_INTERVAL: Duration = Duration::from_secs(86_400);

/// Default name of the cookie carrying the session identifier.
pub const DEFAULT_COOKIE_NAME: &str = "_kvkeeper_session";

/// Configuration for an [`IdleCache`](crate::IdleCache).
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Entries untouched for at least this long are evicted by the sweep.
    pub idle_window: Duration,

    /// How long the background sweeper sleeps between passes.
    /// Defaults to `idle_window`.
    pub sweep_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_IDLE)
    }
}

impl IdleConfig {
    /// Create a configuration whose sweep interval equals the idle window.
    pub fn new(idle_window: Duration) -> Self {
        Self {
            idle_window,
            sweep_interval: idle_window,
        }
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Configuration for the [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie name used by the HTTP layer to carry the session id.
    pub cookie_name: String,

    /// Sessions untouched for this long are reclaimed by garbage collection.
    pub lifetime: Duration,

    /// Interval between garbage collection passes.
    pub gc_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            lifetime: DEFAULT_SESSION_LIFETIME,
            gc_interval: DEFAULT_SESSION_GC_INTERVAL,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Set the session lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the garbage collection interval.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Idle cache settings derived from this configuration.
    pub fn idle_config(&self) -> IdleConfig {
        IdleConfig::new(self.lifetime).with_sweep_interval(self.gc_interval)
    }
}
