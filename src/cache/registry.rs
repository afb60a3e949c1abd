//! Named cache namespaces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::ttl::TtlCache;
use crate::clock::{Clock, SystemClock};
use crate::sweep::Sweep;

/// Hands out one shared [`TtlCache`] per namespace.
///
/// Create the registry once at startup and pass it to whoever needs a cache.
/// Asking for the same namespace again returns a handle to the same store.
pub struct CacheRegistry<V> {
    namespaces: Mutex<HashMap<String, TtlCache<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> CacheRegistry<V> {
    /// Create a registry whose caches use `default_ttl` and the system clock.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    /// Create a registry whose caches read time from `clock`.
    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
            default_ttl,
            clock,
        }
    }

    /// The cache for `name`, created on first use.
    pub fn namespace(&self, name: &str) -> TtlCache<V> {
        let mut namespaces = self.namespaces.lock();
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(namespace = %name, ttl_secs = self.default_ttl.as_secs(), "Creating cache namespace");
                TtlCache::with_clock(self.default_ttl, self.clock.clone())
            })
            .clone()
    }
}

impl<V> CacheRegistry<V> {
    /// Names of every namespace created so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Empty every namespace. The namespaces themselves stay registered.
    pub fn clear_all(&self) {
        for cache in self.namespaces.lock().values() {
            cache.clear();
        }
    }
}

impl<V: Send> Sweep for CacheRegistry<V> {
    fn name(&self) -> &str {
        "cache_registry"
    }

    fn sweep(&self) -> usize {
        self.namespaces.lock().values().map(|cache| cache.purge_expired()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_namespace_is_idempotent() {
        let registry: CacheRegistry<String> = CacheRegistry::new(Duration::from_secs(60));

        let first = registry.namespace("nickname");
        let second = registry.namespace("nickname");
        assert!(first.same_store(&second));

        first.set("key", "value".to_string());
        assert_eq!(second.get("key"), Some("value".to_string()));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let registry: CacheRegistry<String> = CacheRegistry::new(Duration::from_secs(60));

        registry.namespace("nickname").set("key", "a".to_string());
        assert_eq!(registry.namespace("search").get("key"), None);
        assert_eq!(registry.names(), vec!["nickname".to_string(), "search".to_string()]);
    }

    #[test]
    fn test_sweep_and_clear_all() {
        let clock = ManualClock::new();
        let registry: CacheRegistry<u32> = CacheRegistry::with_clock(Duration::from_secs(10), Arc::new(clock.clone()));

        registry.namespace("a").set("x", 1);
        registry.namespace("b").set("y", 2);
        clock.advance(Duration::from_secs(10));
        registry.namespace("b").set("z", 3);

        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.namespace("b").len(), 1);

        registry.clear_all();
        assert!(registry.namespace("b").is_empty());
    }
}
