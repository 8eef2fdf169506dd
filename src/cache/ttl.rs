//! Bounded TTL cache keyed by insertion time.
//!
//! Eviction is oldest-insertion-first; reads do not refresh entries. All
//! operations take the lock once, so concurrent readers never observe a
//! half-evicted map.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TtlCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// A bounded map whose entries expire `ttl` after insertion.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    max_entries: usize,
    evict_count: usize,
}

struct Inner<K, V> {
    map: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache. `evict_count` entries are dropped (oldest first)
    /// whenever an insert finds the cache full.
    pub fn new(ttl: Duration, max_entries: usize, evict_count: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            ttl,
            max_entries: max_entries.max(1),
            evict_count: evict_count.max(1),
        }
    }

    /// Get a value. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.map.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.map.remove(key);
                inner.expirations += 1;
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Get many values in one lock acquisition. Missing or expired keys are
    /// absent from the returned map.
    pub fn get_many(&self, keys: &[K]) -> HashMap<K, V> {
        let mut inner = self.inner.lock();
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            match inner.map.get(key) {
                Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                    out.insert(key.clone(), entry.value.clone());
                    inner.hits += 1;
                }
                Some(_) => {
                    inner.map.remove(key);
                    inner.expirations += 1;
                    inner.misses += 1;
                }
                None => {
                    inner.misses += 1;
                }
            }
        }
        out
    }

    /// Insert a value, evicting the oldest entries first if the cache is full.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        Self::evict_if_full(&mut inner, self.max_entries, self.evict_count, 1);
        inner.map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Insert many values under one lock acquisition.
    pub fn set_many(&self, pairs: impl IntoIterator<Item = (K, V)>) {
        let mut inner = self.inner.lock();
        for (key, value) in pairs {
            Self::evict_if_full(&mut inner, self.max_entries, self.evict_count, 1);
            inner.map.insert(
                key,
                Entry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.inner.lock().map.clear();
    }

    /// Current statistics.
    pub fn stats(&self) -> TtlCacheStats {
        let inner = self.inner.lock();
        TtlCacheStats {
            entries: inner.map.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_full(inner: &mut Inner<K, V>, max: usize, evict_count: usize, incoming: usize) {
        if inner.map.len() + incoming <= max {
            return;
        }
        let mut by_age: Vec<(K, Instant)> = inner
            .map
            .iter()
            .map(|(k, e)| (k.clone(), e.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        for (key, _) in by_age.into_iter().take(evict_count) {
            inner.map.remove(&key);
            inner.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60), 10, 2);
        cache.set("k".to_string(), 1u32);
        assert_eq!(cache.get(&"k".to_string()), Some(1));
    }

    #[test]
    fn test_expired_entry_removed_on_read() {
        let cache = TtlCache::new(Duration::ZERO, 10, 2);
        cache.set("k".to_string(), 1u32);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&"k".to_string()), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_bounded_after_overflow() {
        let cache = TtlCache::new(Duration::from_secs(60), 4, 2);
        for i in 0..5u32 {
            cache.set(i, i);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(cache.len() <= 4);
        // The oldest insertions went first.
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&4), Some(4));
    }

    #[test]
    fn test_get_many_mixed() {
        let cache = TtlCache::new(Duration::from_secs(60), 10, 2);
        cache.set_many([("a".to_string(), 1u32), ("b".to_string(), 2)]);
        let got = cache.get_many(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(got.len(), 2);
        assert_eq!(got.get("a"), Some(&1));
        assert!(!got.contains_key("c"));
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = TtlCache::new(Duration::from_secs(60), 10, 2);
        cache.set("a".to_string(), 1u32);
        cache.get(&"a".to_string());
        cache.get(&"b".to_string());
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache = TtlCache::new(Duration::from_secs(60), 10, 2);
        cache.set("k".to_string(), 1u32);
        cache.set("k".to_string(), 2u32);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }
}
