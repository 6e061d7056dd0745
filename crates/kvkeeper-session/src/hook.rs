//! Eviction hooks for the idle cache.
//!
//! The cache never releases values while holding its lock. Values that
//! leave the live set (idle sweep, replacement by `set`) are collected
//! first and handed to an [`EvictionHook`] after the lock is dropped, so
//! a slow release never stalls unrelated cache traffic.

use std::fmt;

/// Why a value left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The entry sat idle for at least the idle window.
    Idle,
    /// The entry was overwritten by an unconditional `set`.
    Replaced,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictReason::Idle => write!(f, "idle"),
            EvictReason::Replaced => write!(f, "replaced"),
        }
    }
}

/// Receives values after they have been removed from the cache.
///
/// The hook takes ownership of the value; whatever release the value
/// needs happens here or when the value drops.
pub trait EvictionHook<K, V>: Send + Sync {
    /// Called once per removed value, outside the cache lock.
    fn on_evict(&self, key: &K, value: V, reason: EvictReason);
}

/// Hook that simply drops evicted values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOnEvict;

impl<K, V> EvictionHook<K, V> for DropOnEvict {
    fn on_evict(&self, _key: &K, value: V, _reason: EvictReason) {
        drop(value);
    }
}

impl<K, V, F> EvictionHook<K, V> for F
where
    F: Fn(&K, V, EvictReason) + Send + Sync,
{
    fn on_evict(&self, key: &K, value: V, reason: EvictReason) {
        self(key, value, reason)
    }
}
