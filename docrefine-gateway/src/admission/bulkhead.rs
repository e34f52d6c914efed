//! Concurrency isolation for calls to the completion dependency.
//!
//! A fixed number of operations may run at once; excess callers wait in a
//! bounded FIFO queue and are released one at a time as slots free. When the
//! queue is also full, admission fails immediately with
//! [`BulkheadError::QueueFull`] rather than piling up unbounded waiters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Configuration for the bulkhead
#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    /// Operations allowed to run concurrently
    pub max_concurrent: usize,
    /// Callers allowed to wait for a slot
    pub max_queue_size: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue_size: 50,
        }
    }
}

impl BulkheadConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }
}

/// Admission failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum BulkheadError {
    #[error("bulkhead '{name}' queue full ({max_queue_size} waiting)")]
    QueueFull { name: String, max_queue_size: usize },
}

/// Point-in-time counters (for monitoring)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BulkheadStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub rejected: u64,
}

/// Slot held for the duration of one operation. Dropping it releases the
/// slot and wakes the oldest queued waiter, if any.
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Reserved queue position. Dropping it gives the position back, including
/// when the holder's future is cancelled while waiting for a slot.
struct QueuePosition {
    queued: Arc<AtomicUsize>,
}

impl Drop for QueuePosition {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds concurrent work against one dependency.
#[derive(Clone)]
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    slots: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    rejected: Arc<AtomicU64>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            config,
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(AtomicUsize::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a slot, waiting in the queue if all slots are taken.
    ///
    /// Fails immediately with [`BulkheadError::QueueFull`] when the queue is
    /// already at capacity.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            gauge!("bulkhead_active", "name" => self.name.clone())
                .set(self.active_count() as f64);
            return Ok(BulkheadPermit { _permit: permit });
        }

        // Reserve a queue position atomically; back out if we lost the race
        // for the last one.
        let prior = self.queued.fetch_add(1, Ordering::SeqCst);
        if prior >= self.config.max_queue_size {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            counter!("bulkhead_rejections_total", "name" => self.name.clone()).increment(1);
            warn!(
                bulkhead = %self.name,
                max_queue_size = self.config.max_queue_size,
                "admission rejected, queue full"
            );
            return Err(BulkheadError::QueueFull {
                name: self.name.clone(),
                max_queue_size: self.config.max_queue_size,
            });
        }

        // The position must survive exactly as long as the wait: the guard's
        // Drop runs whether the await completes or the caller is cancelled.
        let position = QueuePosition {
            queued: Arc::clone(&self.queued),
        };
        debug!(bulkhead = %self.name, position = prior + 1, "queued for slot");
        let acquired = Arc::clone(&self.slots).acquire_owned().await;
        drop(position);

        match acquired {
            Ok(permit) => Ok(BulkheadPermit { _permit: permit }),
            // The semaphore is never closed while the bulkhead is alive.
            Err(_) => Err(BulkheadError::QueueFull {
                name: self.name.clone(),
                max_queue_size: self.config.max_queue_size,
            }),
        }
    }

    /// Run `operation` inside a slot, releasing it when the future settles.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<Result<T, E>, BulkheadError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().await?;
        let result = operation().await;
        drop(permit);
        Ok(result)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    pub fn active_count(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.slots.available_permits())
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            active: self.active_count(),
            queued: self.queued_count(),
            max_concurrent: self.config.max_concurrent,
            max_queue_size: self.config.max_queue_size,
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bulkhead(max_concurrent: usize, max_queue_size: usize) -> Bulkhead {
        Bulkhead::new(
            "completion",
            BulkheadConfig::default()
                .with_max_concurrent(max_concurrent)
                .with_max_queue_size(max_queue_size),
        )
    }

    #[tokio::test]
    async fn admits_up_to_max_concurrent() {
        let bulkhead = bulkhead(2, 0);

        let p1 = bulkhead.acquire().await;
        let p2 = bulkhead.acquire().await;
        assert!(p1.is_ok());
        assert!(p2.is_ok());
        assert_eq!(bulkhead.active_count(), 2);
    }

    #[tokio::test]
    async fn rejects_when_full_with_empty_queue() {
        let bulkhead = bulkhead(2, 0);

        let _p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.acquire().await.unwrap();

        let third = bulkhead.acquire().await;
        assert!(matches!(third, Err(BulkheadError::QueueFull { .. })));
        assert_eq!(bulkhead.stats().rejected, 1);
    }

    #[tokio::test]
    async fn releasing_a_slot_readmits() {
        let bulkhead = bulkhead(2, 0);

        let p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.acquire().await.unwrap();
        assert!(bulkhead.acquire().await.is_err());

        drop(p1);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn queued_caller_waits_for_a_slot() {
        let bulkhead = bulkhead(1, 1);

        let permit = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queued_count(), 1);

        drop(permit);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn queue_capacity_is_enforced() {
        let bulkhead = bulkhead(1, 1);

        let _permit = bulkhead.acquire().await.unwrap();

        let _waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                let _p = bulkhead.acquire().await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Slot taken and queue occupied; the next caller is turned away.
        let overflow = bulkhead.acquire().await;
        assert!(matches!(overflow, Err(BulkheadError::QueueFull { .. })));
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_queue_position() {
        let bulkhead = bulkhead(1, 1);
        let permit = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queued_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bulkhead.queued_count(), 0);

        // The freed position admits a new waiter, which gets the slot once
        // the original permit is released.
        let replacement = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queued_count(), 1);

        drop(permit);
        assert!(replacement.await.unwrap());
    }

    #[tokio::test]
    async fn execute_releases_slot_on_failure() {
        let bulkhead = bulkhead(1, 0);

        let result: Result<Result<(), &str>, _> =
            bulkhead.execute(|| async { Err("boom") }).await;
        assert!(matches!(result, Ok(Err("boom"))));

        // The failed operation did not leak its slot.
        assert_eq!(bulkhead.active_count(), 0);
        assert!(bulkhead.acquire().await.is_ok());
    }
}
