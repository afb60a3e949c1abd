//! Time-to-live cache for upstream results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::sweep::Sweep;

/// Default time-to-live for cached upstream results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A stored value and the time it stops being valid.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

struct Inner<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

/// A keyed cache whose entries expire after a fixed time.
///
/// This is a handle: clones share the same storage. There is no size bound
/// and no LRU eviction; entries only leave on expiry, [`delete`](Self::delete)
/// or [`clear`](Self::clear). An expired entry is never returned, and
/// reading one removes it.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache using the system clock.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`.
    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                default_ttl,
                clock,
            }),
        }
    }

    /// Create a cache from the `cache` configuration section.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.default_ttl())
    }

    /// Look up a live value.
    ///
    /// Returns `None` for absent and expired keys alike; an expired entry is
    /// evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.inner.entries.lock();
        let now = self.inner.clock.now();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                trace!(key = %key, "Cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                debug!(key = %key, "Cache entry expired");
                None
            }
            None => {
                trace!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Store a value with the default TTL, replacing any existing entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.inner.default_ttl);
    }

    /// Store a value with an explicit TTL, replacing any existing entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut entries = self.inner.entries.lock();
        let stored_at = self.inner.clock.now();

        trace!(key = %key, ttl_secs = ttl.as_secs(), "Cache store");
        entries.insert(key, CacheEntry { value, stored_at, ttl });
    }

    /// Whether a live value exists for `key`. Evicts it if expired.
    pub fn contains(&self, key: &str) -> bool {
        let mut entries = self.inner.entries.lock();
        let now = self.inner.clock.now();

        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }
}

impl<V> TtlCache<V> {
    /// Remove `key`. Returns whether an entry was stored for it.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.entries.lock().remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        let now = self.inner.clock.now();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// TTL applied by [`set`](Self::set).
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Whether two handles share the same storage.
    pub fn same_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Send> Sweep for TtlCache<V> {
    fn name(&self) -> &str {
        "ttl_cache"
    }

    fn sweep(&self) -> usize {
        self.purge_expired()
    }
}
