// TTL cache for normalized fetch results
// Sits in front of every outbound scrape so identical queries inside the TTL never leave the process

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

// Stats exposed to the health endpoint
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub eviction_count: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hit_count + self.miss_count;
        if lookups == 0 {
            0.0
        } else {
            self.hit_count as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(900),
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) >= ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    expired: AtomicUsize,
    evictions: AtomicUsize,
}

// Key/value store with a single TTL applied to every entry.
// Expiry is lazy: a stale entry is dropped by the `get` that finds it, there
// is no background sweep. Each key's check-then-evict runs under that key's
// shard lock, so a concurrent `set` of a fresh value is never evicted.
#[derive(Debug)]
pub struct TtlCache<V> {
    store: DashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    counters: Counters,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: DashMap::new(),
            config,
            counters: Counters::default(),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(CacheConfig {
            ttl,
            ..Default::default()
        })
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired(now, self.config.ttl) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "cache hit");
                return Some(entry.value.clone());
            }
        }

        // The read guard is gone; re-check under the write lock before evicting
        let ttl = self.config.ttl;
        if self
            .store
            .remove_if(key, |_, entry| entry.is_expired(now, ttl))
            .is_some()
        {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache entry expired");
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: &str, value: V) {
        if !self.store.contains_key(key) && self.store.len() >= self.config.max_entries {
            self.make_room();
        }

        self.store.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    // Returns the number of entries dropped
    pub fn clear(&self) -> usize {
        let removed = self.store.len();
        self.store.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items_count: self.store.len(),
            hit_count: self.counters.hits.load(Ordering::Relaxed),
            miss_count: self.counters.misses.load(Ordering::Relaxed),
            expired_count: self.counters.expired.load(Ordering::Relaxed),
            eviction_count: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    // Purge everything stale first, then drop the oldest entry if still at capacity
    fn make_room(&self) {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired(now, ttl));
        let purged = before.saturating_sub(self.store.len());
        self.counters.expired.fetch_add(purged, Ordering::Relaxed);

        if self.store.len() < self.config.max_entries {
            return;
        }

        let oldest = self
            .store
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.store.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache full, evicted oldest entry");
            }
        }
    }
}
