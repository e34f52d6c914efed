//! Two-tier read-through cache for completion responses.
//!
//! Reads consult the fast in-process tier first, then the shared store; a
//! tier-two hit backfills tier one with a short TTL so a hot key stops
//! paying the store round trip. Writes go through to both tiers at once,
//! with tier one's TTL clamped so the bounded tier stays small and fresh.
//!
//! Keys are opaque strings; callers derive them (see
//! [`docrefine_core::domain::CompletionRequest::fingerprint`]).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docrefine_core::traits::CacheStore;

use super::memory::{MemoryCache, MemoryCacheConfig};

/// Configuration for the tiered cache
#[derive(Debug, Clone, Copy)]
pub struct TieredCacheConfig {
    /// TTL used when the caller does not supply one
    pub default_ttl: Duration,
    /// Ceiling on the fast tier's TTL for backfilled entries
    pub backfill_ttl: Duration,
    /// Fast-tier sizing and freshness
    pub memory: MemoryCacheConfig,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            backfill_ttl: Duration::from_secs(30),
            memory: MemoryCacheConfig::default(),
        }
    }
}

impl TieredCacheConfig {
    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    pub fn with_backfill_ttl(mut self, backfill_ttl: Duration) -> Self {
        self.backfill_ttl = backfill_ttl;
        self
    }

    pub fn with_memory(mut self, memory: MemoryCacheConfig) -> Self {
        self.memory = memory;
        self
    }
}

/// Counters accumulated across both tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// Current fast-tier entry count
    pub size: usize,
}

/// Read-through cache over a fast in-process tier and a shared store.
pub struct TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    config: TieredCacheConfig,
    l1: MemoryCache<V>,
    l2: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

impl<V> TieredCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(config: TieredCacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            l1: MemoryCache::new(config.memory),
            config,
            l2: store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`, consulting the fast tier first and backfilling it on
    /// a store hit.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.l1.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, tier = 1, "cache hit");
            return Some(value);
        }

        if let Some(payload) = self.l2.get(key).await {
            match serde_json::from_str::<V>(&payload) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, tier = 2, "cache hit");
                    let backfill = self.config.backfill_ttl.min(self.config.default_ttl);
                    if self.l1.set(key, value.clone(), backfill) {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    return Some(value);
                }
                Err(err) => {
                    // A stale or corrupt payload must not wedge the key.
                    warn!(key, error = %err, "dropping undecodable cache payload");
                    self.l2.delete(key).await;
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write `value` through both tiers.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.sets.fetch_add(1, Ordering::Relaxed);

        if self.l1.set(key, value.clone(), ttl) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        match serde_json::to_string(&value) {
            Ok(payload) => self.l2.set(key, payload, ttl).await,
            Err(err) => warn!(key, error = %err, "value not serializable, skipping store tier"),
        }
    }

    /// Remove `key` from both tiers. Returns true if either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let in_l1 = self.l1.delete(key);
        let in_l2 = self.l2.delete(key).await;
        let removed = in_l1 || in_l2;
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        self.l1.clear();
        self.l2.clear().await;
    }

    /// Drop the fast tier only, leaving the shared store intact.
    pub fn clear_local(&self) {
        self.l1.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.l1.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::InMemoryStore;
    use tokio::time::sleep;

    fn cache() -> TieredCache<String> {
        TieredCache::new(TieredCacheConfig::default(), Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn miss_then_set_then_hit() {
        let cache = cache();

        assert_eq!(cache.get("k").await, None);
        cache.set("k", "value".to_string(), None).await;
        assert_eq!(cache.get("k").await, Some("value".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[tokio::test]
    async fn store_hit_backfills_fast_tier() {
        let store = Arc::new(InMemoryStore::new());
        let cache: TieredCache<String> =
            TieredCache::new(TieredCacheConfig::default(), store.clone());

        // Seed only the store, as another node would.
        store
            .set(
                "k",
                serde_json::to_string("from-store").unwrap(),
                Duration::from_secs(300),
            )
            .await;

        assert_eq!(cache.get("k").await, Some("from-store".to_string()));
        // Now present in the fast tier.
        assert_eq!(cache.stats().size, 1);
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let cache = cache();
        cache.set("k", "value".to_string(), None).await;

        assert!(cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn ttl_expiry_applies_to_both_tiers() {
        let cache = cache();
        cache
            .set("k", "value".to_string(), Some(Duration::from_millis(30)))
            .await;

        sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn clear_local_keeps_store_tier() {
        let cache = cache();
        cache.set("k", "value".to_string(), None).await;

        cache.clear_local();
        assert_eq!(cache.stats().size, 0);

        // Still served from the store, then backfilled.
        assert_eq!(cache.get("k").await, Some("value".to_string()));
    }

    #[tokio::test]
    async fn corrupt_store_payload_reads_as_miss() {
        let store = Arc::new(InMemoryStore::new());
        let cache: TieredCache<u64> =
            TieredCache::new(TieredCacheConfig::default(), store.clone());

        store
            .set("k", "not a number".to_string(), Duration::from_secs(300))
            .await;

        assert_eq!(cache.get("k").await, None);
        // The bad payload was dropped.
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn stats_track_evictions() {
        let config = TieredCacheConfig::default()
            .with_memory(MemoryCacheConfig::default().with_max_entries(1));
        let cache: TieredCache<String> =
            TieredCache::new(config, Arc::new(InMemoryStore::new()));

        cache.set("a", "1".to_string(), None).await;
        cache.set("b", "2".to_string(), None).await;

        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().size, 1);
    }
}
