//! Default backing store for the second cache tier.
//!
//! The tier-two contract lives in [`docrefine_core::traits::CacheStore`];
//! any shared key-value service (Redis, memcached) can implement it. This
//! in-process implementation keeps single-node deployments dependency-free
//! and doubles as the store used in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use docrefine_core::traits::CacheStore;

#[derive(Debug, Clone)]
struct StoredValue {
    payload: String,
    expires_at: DateTime<Utc>,
}

/// In-process [`CacheStore`] holding serialized values with lazy expiry.
#[derive(Default)]
pub struct InMemoryStore {
    values: DashMap<String, StoredValue>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(stored) = self.values.get(key) {
            if Utc::now() > stored.expires_at {
                drop(stored);
                self.values.remove(key);
                return None;
            }
            Some(stored.payload.clone())
        } else {
            None
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(300));
        self.values.insert(
            key.to_string(),
            StoredValue {
                payload: value,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    async fn clear(&self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let store = InMemoryStore::new();
        store
            .set("k", "\"payload\"".to_string(), Duration::from_secs(30))
            .await;

        assert_eq!(store.get("k").await, Some("\"payload\"".to_string()));
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn expired_value_is_dropped_on_read() {
        let store = InMemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_millis(30))
            .await;

        sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = InMemoryStore::new();
        store
            .set("k", "v".to_string(), Duration::from_secs(30))
            .await;

        assert!(store.delete("k").await);
        assert!(!store.delete("k").await);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = InMemoryStore::new();
        store.set("a", "1".to_string(), Duration::from_secs(30)).await;
        store.set("b", "2".to_string(), Duration::from_secs(30)).await;

        store.clear().await;
        assert!(store.is_empty());
    }
}
