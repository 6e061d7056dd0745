//! Idle-evicting keyed cache.
//!
//! [`IdleCache`] keeps long-lived handles (backend connections, session
//! stores) keyed by an identifier and drops the ones nobody has touched
//! within the idle window. Structure and recency order live together in
//! one [`LruCache`] behind a single mutex, so the key sets of the map and
//! the recency queue cannot diverge.
//!
//! # Recency order
//!
//! Every successful [`IdleCache::get`] moves the entry to the
//! most-recently-used end and refreshes its access time. The sweep relies
//! on this: it walks from the least-recently-used end and stops at the
//! first entry still inside the window, because every entry behind it was
//! touched later.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::IdleConfig;
use crate::hook::{DropOnEvict, EvictReason, EvictionHook};

/// Entry stored in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value.
    pub value: V,

    /// Last time the entry was inserted or read.
    pub last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            last_accessed: Instant::now(),
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed)
    }
}

struct Shared<K: Hash + Eq, V> {
    /// Entries ordered by access recency (most recent first).
    entries: Mutex<LruCache<K, CacheEntry<V>>>,

    /// Serializes sweeps; never held together with `entries` across a release.
    sweep_lock: Mutex<()>,

    hook: Box<dyn EvictionHook<K, V>>,

    config: IdleConfig,
}

/// Keyed cache that evicts entries left idle for a configured window.
///
/// Cloning an `IdleCache` yields another handle to the same entries.
pub struct IdleCache<K: Hash + Eq, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> IdleCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache whose evicted values are simply dropped.
    pub fn new(config: IdleConfig) -> Self {
        Self::with_hook(config, DropOnEvict)
    }

    /// Create a cache that hands evicted and replaced values to `hook`.
    pub fn with_hook<H>(config: IdleConfig, hook: H) -> Self
    where
        H: EvictionHook<K, V> + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(LruCache::unbounded()),
                sweep_lock: Mutex::new(()),
                hook: Box::new(hook),
                config,
            }),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &IdleConfig {
        &self.shared.config
    }

    /// Look up a value, refreshing its access time and recency.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entries = self.shared.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        trace!("Idle cache hit");
        Some(entry.value.clone())
    }

    /// Look up a value without touching its access time or recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .entries
            .lock()
            .peek(key)
            .map(|entry| entry.value.clone())
    }

    /// Check whether a key is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.entries.lock().contains(key)
    }

    /// Insert a value unconditionally.
    ///
    /// A value already cached under `key` is replaced and handed to the
    /// eviction hook once the lock is released. Callers must be able to
    /// tolerate the old value being released while someone else may still
    /// hold it; values that need safe release should be reference counted.
    pub fn set(&self, key: K, value: V) {
        let replaced = {
            let mut entries = self.shared.entries.lock();
            entries.put(key.clone(), CacheEntry::new(value))
        };

        if let Some(old) = replaced {
            debug!("Idle cache entry replaced");
            self.shared
                .hook
                .on_evict(&key, old.value, EvictReason::Replaced);
        }
    }

    /// Insert a value only if `key` is absent.
    ///
    /// Returns `Err(value)` when another value already occupies the key;
    /// the rejected value is handed back untouched and releasing it is the
    /// caller's job.
    pub fn set_if_absent(&self, key: K, value: V) -> Result<(), V> {
        let mut entries = self.shared.entries.lock();
        if entries.contains(&key) {
            return Err(value);
        }
        entries.put(key, CacheEntry::new(value));
        trace!(size = entries.len(), "Idle cache entry inserted");
        Ok(())
    }

    /// Remove a value without invoking the eviction hook.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .entries
            .lock()
            .pop(key)
            .map(|entry| entry.value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Keys currently cached, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        self.shared
            .entries
            .lock()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Evict every entry idle for at least the idle window.
    ///
    /// Returns the number of entries evicted.
    pub fn sweep(&self) -> usize {
        sweep_shared(&self.shared)
    }

    /// Start the background sweeper.
    ///
    /// The task sleeps for the sweep interval, sweeps, and repeats; a pass
    /// is only scheduled after the previous one finished. It stops when
    /// `shutdown` is cancelled or every handle to the cache is dropped.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let weak: Weak<Shared<K, V>> = Arc::downgrade(&self.shared);
        let interval = self.shared.config.sweep_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(shared) = weak.upgrade() else {
                    break;
                };
                sweep_shared(&shared);
            }
            debug!("Idle cache sweeper stopped");
        })
    }
}

fn sweep_shared<K, V>(shared: &Shared<K, V>) -> usize
where
    K: Hash + Eq,
{
    let _sweeping = shared.sweep_lock.lock();
    let window = shared.config.idle_window;
    let now = Instant::now();

    let evicted = {
        let mut entries = shared.entries.lock();
        let mut evicted = Vec::new();
        while let Some((_, oldest)) = entries.peek_lru() {
            if oldest.idle_for(now) < window {
                break;
            }
            if let Some((key, entry)) = entries.pop_lru() {
                evicted.push((key, entry.value));
            }
        }
        evicted
    };

    let count = evicted.len();
    for (key, value) in evicted {
        shared.hook.on_evict(&key, value, EvictReason::Idle);
    }

    if count > 0 {
        debug!(count, "Evicted idle cache entries");
    }

    count
}

impl<K: Hash + Eq, V> Clone for IdleCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
