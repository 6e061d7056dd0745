//! Idle-evicting handle cache and browser session storage.
//!
//! This crate provides:
//! - [`IdleCache`], a keyed cache that evicts entries nobody touched within
//!   an idle window, releasing them outside its lock
//! - [`SessionManager`], per-browser key/value storage on top of a
//!   pluggable [`SessionProvider`]
//!
//! # Example
//!
//! ```rust,ignore
//! use kvkeeper_session::{IdleCache, IdleConfig};
//!
//! let cache = IdleCache::new(IdleConfig::new(Duration::from_secs(3600)));
//! cache.set("127.0.0.1:2379-root".to_string(), client);
//! let sweeper = cache.spawn_sweeper(shutdown.clone());
//! ```

mod config;
mod error;
mod hook;
mod idle;
mod session;

pub use config::{
    DEFAULT_CONNECTION_IDLE, DEFAULT_COOKIE_NAME, DEFAULT_SESSION_GC_INTERVAL,
    DEFAULT_SESSION_LIFETIME, IdleConfig, SessionConfig,
};
pub use error::{Error, Result};
pub use hook::{DropOnEvict, EvictReason, EvictionHook};
pub use idle::{CacheEntry, IdleCache};
pub use session::{
    MemoryProvider, SessionManager, SessionProvider, SessionStart, SessionStore, SharedSession,
};
