//! Adaptive per-call deadlines derived from observed latencies.
//!
//! The gateway records the latency of each successful completion call; the
//! deadline for the next call is `max(base_timeout, p95 × multiplier)` over a
//! bounded window of recent samples. With no samples yet, the configured base
//! applies.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use docrefine_core::CompletionError;
use tracing::debug;

/// Configuration for adaptive timeouts
#[derive(Debug, Clone)]
pub struct AdaptiveTimeoutConfig {
    /// Floor for the derived deadline; also the deadline while no samples
    /// have been recorded
    pub base_timeout: Duration,
    /// Headroom applied to the observed p95
    pub multiplier: f64,
    /// Most recent samples retained
    pub sample_capacity: usize,
}

impl Default for AdaptiveTimeoutConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(30),
            multiplier: 2.0,
            sample_capacity: 100,
        }
    }
}

/// Latency tracker deriving per-call deadlines.
pub struct AdaptiveTimeout {
    config: AdaptiveTimeoutConfig,
    // Plain mutex: never held across an await.
    samples: Mutex<VecDeque<Duration>>,
}

impl AdaptiveTimeout {
    pub fn new(config: AdaptiveTimeoutConfig) -> Self {
        let capacity = config.sample_capacity;
        Self {
            config,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if samples.len() == self.config.sample_capacity {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    /// Deadline for the next call: `max(base_timeout, p95 × multiplier)`.
    pub fn current_timeout(&self) -> Duration {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if samples.is_empty() {
            return self.config.base_timeout;
        }

        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = sorted[index];

        let derived = Duration::from_secs_f64(p95.as_secs_f64() * self.config.multiplier);
        let timeout = derived.max(self.config.base_timeout);
        debug!(?p95, ?timeout, samples = sorted.len(), "derived adaptive timeout");
        timeout
    }

    pub fn sample_count(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

/// Race `future` against a deadline.
///
/// `tokio::time::timeout` drops its timer on the non-timeout path, so no
/// pending wake-up leaks. Expiry aborts waiting for the result (the
/// underlying operation cannot be force-terminated) and yields a timeout
/// error from the taxonomy.
pub async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T, CompletionError>
where
    F: Future<Output = Result<T, CompletionError>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(CompletionError::timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrefine_core::ErrorCategory;

    fn tracker(base_ms: u64, multiplier: f64) -> AdaptiveTimeout {
        AdaptiveTimeout::new(AdaptiveTimeoutConfig {
            base_timeout: Duration::from_millis(base_ms),
            multiplier,
            sample_capacity: 10,
        })
    }

    #[test]
    fn test_empty_buffer_uses_base() {
        let tracker = tracker(500, 2.0);
        assert_eq!(tracker.current_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_never_below_base() {
        let tracker = tracker(500, 2.0);
        for _ in 0..10 {
            tracker.record_response_time(Duration::from_millis(10));
        }
        assert_eq!(tracker.current_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_p95_times_multiplier() {
        let tracker = tracker(100, 2.0);
        // 20 samples won't fit in capacity 10; last 10 survive
        for ms in 1..=20u64 {
            tracker.record_response_time(Duration::from_millis(ms * 100));
        }
        assert_eq!(tracker.sample_count(), 10);

        // Surviving samples are 1100..=2000ms; p95 = 2000ms
        assert_eq!(tracker.current_timeout(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_deadline_passes_fast_operations() {
        let result = with_deadline(Duration::from_millis(100), async {
            Ok::<_, CompletionError>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_deadline_expiry_yields_timeout_category() {
        let err = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, CompletionError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Timeout);
        assert!(err.is_retryable());
        assert!(err.trips_breaker());
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = with_deadline(Duration::from_millis(100), async {
            Err::<(), _>(CompletionError::from_status(500, "boom"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.category, ErrorCategory::ServerError);
    }
}
