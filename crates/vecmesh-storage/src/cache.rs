//! Bounded LRU cache with access-based expiry.
//!
//! Backs both the query-id set and the response cache: entries are
//! dropped after a TTL measured from their last touch (reads and writes
//! both refresh it), and the least recently used entry is evicted once
//! the capacity is reached.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Counters describing cache behavior.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: V,
    touched: Instant,
}

/// LRU cache whose entries expire `ttl` after their last access.
pub struct TtlCache<K: Hash + Eq, V> {
    cache: LruCache<K, Entry<V>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Creates a cache bounded at `capacity` entries with the given
    /// access TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached value, refreshing its TTL. Expired entries are
    /// removed and reported as misses.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.cache.get_mut(key) {
            Some(entry) if entry.touched.elapsed() <= self.ttl => {
                entry.touched = Instant::now();
                self.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {
                self.cache.pop(key);
                self.stats.expirations += 1;
            }
            None => {}
        }
        self.stats.misses += 1;
        None
    }

    /// Returns whether a live entry exists for `key`, refreshing its TTL.
    pub fn contains(&mut self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces an entry, starting a fresh TTL. Evicts the
    /// least recently used entry when full.
    pub fn put(&mut self, key: K, value: V) {
        self.cache.put(
            key,
            Entry {
                value,
                touched: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("size", &self.cache.len())
            .field("capacity", &self.cache.cap())
            .field("ttl", &self.ttl)
            .field("stats", &self.stats)
            .finish()
    }
}
