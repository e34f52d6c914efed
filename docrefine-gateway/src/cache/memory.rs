//! Fast in-process cache tier.
//!
//! Bounded by entry count; when full, the entry with the oldest `created_at`
//! is evicted before a new key is inserted. Expiry is checked lazily on read
//! and an expired entry is removed and reported as a miss. Requested TTLs
//! are clamped to a small ceiling so the tier stays fresh regardless of what
//! the caller asks for.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

/// Configuration for the in-process tier
#[derive(Debug, Clone, Copy)]
pub struct MemoryCacheConfig {
    /// Maximum entries held at once
    pub max_entries: usize,
    /// Ceiling applied to every requested TTL
    pub ttl_ceiling: Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl_ceiling: Duration::from_secs(60),
        }
    }
}

impl MemoryCacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_ttl_ceiling(mut self, ttl_ceiling: Duration) -> Self {
        self.ttl_ceiling = ttl_ceiling;
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(60));
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
            hit_count: 0,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Bounded in-process cache with oldest-created eviction.
pub struct MemoryCache<V>
where
    V: Clone + Send + Sync,
{
    config: MemoryCacheConfig,
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Look up `key`, removing it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
            entry.hit_count += 1;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Insert `value` under `key` with `ttl` clamped to the configured
    /// ceiling. Returns true if an entry was evicted to make room.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> bool {
        let ttl = ttl.min(self.config.ttl_ceiling);

        let mut evicted = false;
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key) {
            if let Some(oldest) = self.oldest_key() {
                self.entries.remove(&oldest);
                evicted = true;
            }
        }

        self.entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        evicted
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.key().clone())
    }
}
