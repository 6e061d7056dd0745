//! Configuration types mapping to the YAML/TOML schema.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8010
//! loglevel: info
//! session:
//!   lifetimeSecs: 3600
//! backends:
//!   - endpoints: 127.0.0.1:2379
//!     name: local
//!     separator: /
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8010;

/// Default key separator used to build directory trees.
pub const DEFAULT_SEPARATOR: &str = "/";

/// Endpoint used when no backend is configured.
pub const DEFAULT_ENDPOINTS: &str = "127.0.0.1:2379";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Host to listen on.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Debug mode.
    pub debug: bool,

    /// Default log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub loglevel: String,

    /// Session and connection lifetimes.
    pub session: SessionSettings,

    /// Backends offered to the operator.
    #[serde(alias = "etcds")]
    pub backends: Vec<BackendConfig>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        let mut config = Self {
            host: String::new(),
            port: 0,
            debug: false,
            loglevel: String::new(),
            session: SessionSettings::default(),
            backends: Vec::new(),
        };
        config.normalize();
        config
    }
}

impl KeeperConfig {
    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.normalize();
        Ok(config)
    }

    /// Parse from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let mut config: Self =
            serde_yaml::from_str(yaml_str).map_err(|e| ConfigError::ParseYaml(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Fill in defaults for empty fields.
    ///
    /// An empty backend list becomes a single `default` backend on
    /// [`DEFAULT_ENDPOINTS`].
    pub fn normalize(&mut self) {
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.loglevel.is_empty() {
            self.loglevel = "info".to_string();
        }
        if self.backends.is_empty() {
            self.backends.push(BackendConfig {
                endpoints: DEFAULT_ENDPOINTS.to_string(),
                name: "default".to_string(),
                ..Default::default()
            });
        }
        for backend in &mut self.backends {
            backend.normalize();
        }
        self.session.normalize();
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.endpoints.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "backend '{}' has no endpoints",
                    backend.name
                )));
            }
            if !seen.insert(backend.endpoints.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate backend endpoints '{}'",
                    backend.endpoints
                )));
            }
        }
        Ok(())
    }

    /// Find a backend by its endpoint string.
    pub fn lookup(&self, endpoints: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.endpoints == endpoints)
    }

    /// `host:port` to bind the HTTP listener to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// One key-value store the operator can connect to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Endpoint address, also the identifier the browser sends back.
    pub endpoints: String,

    /// Display name.
    pub name: String,

    /// Separator splitting keys into directory levels.
    pub separator: String,
}

impl BackendConfig {
    /// Backend settings for an endpoint that is not in the config file.
    pub fn adhoc(endpoints: impl Into<String>) -> Self {
        let mut backend = Self {
            endpoints: endpoints.into(),
            ..Default::default()
        };
        backend.normalize();
        backend
    }

    fn normalize(&mut self) {
        if self.separator.is_empty() {
            self.separator = DEFAULT_SEPARATOR.to_string();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Session and connection cache lifetimes, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Cookie carrying the session id.
    pub cookie_name: String,

    /// Sessions idle this long are reclaimed.
    pub lifetime_secs: u64,

    /// Interval between session garbage collection passes.
    pub gc_interval_secs: u64,

    /// Backend connections idle this long are closed.
    pub connection_idle_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "_kvkeeper_session".to_string(),
            lifetime_secs: 3600,
            gc_interval_secs: 86_400,
            connection_idle_secs: 3780,
        }
    }
}

impl SessionSettings {
    fn normalize(&mut self) {
        let defaults = Self::default();
        if self.cookie_name.is_empty() {
            self.cookie_name = defaults.cookie_name;
        }
        if self.lifetime_secs == 0 {
            self.lifetime_secs = defaults.lifetime_secs;
        }
        if self.gc_interval_secs == 0 {
            self.gc_interval_secs = defaults.gc_interval_secs;
        }
        if self.connection_idle_secs == 0 {
            self.connection_idle_secs = defaults.connection_idle_secs;
        }
    }
}
