//! Sliding-window rate limiting per caller identity.
//!
//! Tracks the timestamps of admitted events inside a trailing window and
//! rejects once the configured ceiling is reached. Request counts and token
//! spend are tracked independently; rejected calls are never recorded, so a
//! burst of denials does not extend the lockout.
//!
//! The limiter never fails: every check returns a [`RateLimitDecision`] and
//! the caller decides how to surface a denial.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the sliding-window limiter
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Length of the trailing window
    pub window: Duration,
    /// Maximum admitted requests per identifier within the window
    pub max_requests: u32,
    /// Maximum admitted tokens per identifier within the window
    pub max_tokens: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            max_tokens: 100_000,
        }
    }
}

impl RateLimiterConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the call was admitted
    pub allowed: bool,
    /// Units (requests or tokens) still available in the current window
    pub remaining: u64,
    /// Configured ceiling for this check
    pub limit: u64,
    /// Time until the window frees at least one unit
    pub reset_after: Duration,
    /// Wall-clock instant the window frees at least one unit
    pub reset_at: DateTime<Utc>,
}

/// Aggregate counters across all identifiers (for monitoring)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Admitted requests currently inside some identifier's window
    pub request_count: u64,
    /// Admitted tokens currently inside some identifier's window
    pub token_count: u64,
    /// Identifiers with at least one surviving entry
    pub user_count: usize,
}

/// Per-identifier sliding-window limiter for request rate and token spend.
///
/// Check-then-append runs under the identifier's map entry guard, so two
/// concurrent checks for the same identifier cannot both take the last slot.
pub struct SlidingWindowLimiter {
    config: RateLimiterConfig,
    requests: DashMap<String, VecDeque<DateTime<Utc>>>,
    tokens: DashMap<String, VecDeque<(DateTime<Utc>, u64)>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            requests: DashMap::new(),
            tokens: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check whether one more request from `identifier` fits in the window,
    /// recording it only if admitted.
    pub fn check_request(&self, identifier: &str) -> RateLimitDecision {
        let now = Utc::now();
        let cutoff = now - chrono_window(self.config.window);
        let limit = self.config.max_requests as u64;

        let mut entry = self.requests.entry(identifier.to_string()).or_default();
        let window = entry.value_mut();
        while window.front().is_some_and(|ts| *ts <= cutoff) {
            window.pop_front();
        }

        let current = window.len() as u64;
        if current < limit {
            window.push_back(now);
            let (reset_after, reset_at) = self.reset_point(window.front().copied(), now);
            RateLimitDecision {
                allowed: true,
                remaining: limit - current - 1,
                limit,
                reset_after,
                reset_at,
            }
        } else {
            let (reset_after, reset_at) = self.reset_point(window.front().copied(), now);
            debug!(identifier, current, limit, "request rate limit exceeded");
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit,
                reset_after,
                reset_at,
            }
        }
    }

    /// Check whether `token_count` more tokens from `identifier` fit in the
    /// window, recording the spend only if admitted.
    ///
    /// Spend is stored as `(timestamp, count)` buckets rather than one entry
    /// per token; the admission boundary is identical.
    pub fn check_tokens(&self, identifier: &str, token_count: u64) -> RateLimitDecision {
        let now = Utc::now();
        let cutoff = now - chrono_window(self.config.window);
        let limit = self.config.max_tokens;

        let mut entry = self.tokens.entry(identifier.to_string()).or_default();
        let window = entry.value_mut();
        while window.front().is_some_and(|(ts, _)| *ts <= cutoff) {
            window.pop_front();
        }

        let current: u64 = window.iter().map(|(_, n)| *n).sum();
        if current + token_count <= limit {
            window.push_back((now, token_count));
            let (reset_after, reset_at) = self.reset_point(window.front().map(|(ts, _)| *ts), now);
            RateLimitDecision {
                allowed: true,
                remaining: limit - current - token_count,
                limit,
                reset_after,
                reset_at,
            }
        } else {
            let (reset_after, reset_at) = self.reset_point(window.front().map(|(ts, _)| *ts), now);
            debug!(
                identifier,
                current, token_count, limit, "token rate limit exceeded"
            );
            RateLimitDecision {
                allowed: false,
                remaining: limit.saturating_sub(current),
                limit,
                reset_after,
                reset_at,
            }
        }
    }

    /// Aggregate counters across every identifier's surviving entries.
    pub fn stats(&self) -> RateLimiterStats {
        let now = Utc::now();
        let cutoff = now - chrono_window(self.config.window);

        let mut request_count = 0u64;
        let mut token_count = 0u64;
        let mut users = std::collections::HashSet::new();

        for entry in self.requests.iter() {
            let live = entry.value().iter().filter(|ts| **ts > cutoff).count() as u64;
            if live > 0 {
                request_count += live;
                users.insert(entry.key().clone());
            }
        }
        for entry in self.tokens.iter() {
            let live: u64 = entry
                .value()
                .iter()
                .filter(|(ts, _)| *ts > cutoff)
                .map(|(_, n)| *n)
                .sum();
            if live > 0 {
                token_count += live;
                users.insert(entry.key().clone());
            }
        }

        RateLimiterStats {
            request_count,
            token_count,
            user_count: users.len(),
        }
    }

    /// Drop identifiers whose windows have fully drained.
    pub fn prune(&self) {
        let cutoff = Utc::now() - chrono_window(self.config.window);
        self.requests
            .retain(|_, window| window.iter().any(|ts| *ts > cutoff));
        self.tokens
            .retain(|_, window| window.iter().any(|(ts, _)| *ts > cutoff));
    }

    fn reset_point(
        &self,
        oldest: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> (Duration, DateTime<Utc>) {
        let reset_at = match oldest {
            Some(ts) => ts + chrono_window(self.config.window),
            None => now + chrono_window(self.config.window),
        };
        let reset_after = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
        (reset_after, reset_at)
    }
}

fn chrono_window(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window_ms: u64, max_requests: u32, max_tokens: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(
            RateLimiterConfig::default()
                .with_window(Duration::from_millis(window_ms))
                .with_max_requests(max_requests)
                .with_max_tokens(max_tokens),
        )
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = limiter(60_000, 3, 1_000);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_request("user-1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }

        let denied = limiter.check_request("user-1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[test]
    fn rejected_calls_are_not_recorded() {
        let limiter = limiter(60_000, 1, 1_000);

        assert!(limiter.check_request("user-1").allowed);
        for _ in 0..5 {
            assert!(!limiter.check_request("user-1").allowed);
        }

        // Only the single admitted request counts toward stats.
        assert_eq!(limiter.stats().request_count, 1);
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = limiter(60_000, 1, 1_000);

        assert!(limiter.check_request("user-1").allowed);
        assert!(!limiter.check_request("user-1").allowed);
        assert!(limiter.check_request("user-2").allowed);
    }

    #[tokio::test]
    async fn window_expiry_readmits() {
        let limiter = limiter(50, 1, 1_000);

        assert!(limiter.check_request("user-1").allowed);
        assert!(!limiter.check_request("user-1").allowed);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check_request("user-1").allowed);
    }

    #[test]
    fn reset_point_is_oldest_surviving_plus_window() {
        let limiter = limiter(60_000, 2, 1_000);

        let first = limiter.check_request("user-1");
        limiter.check_request("user-1");
        let denied = limiter.check_request("user-1");

        assert!(!denied.allowed);
        // The first admitted request anchors the window.
        assert_eq!(denied.reset_at, first.reset_at);
        assert!(denied.reset_after <= Duration::from_secs(60));
    }

    #[test]
    fn token_check_uses_cumulative_spend() {
        let limiter = limiter(60_000, 100, 100);

        let first = limiter.check_tokens("user-1", 60);
        assert!(first.allowed);
        assert_eq!(first.remaining, 40);

        let second = limiter.check_tokens("user-1", 50);
        assert!(!second.allowed);
        assert_eq!(second.remaining, 40);

        // An exact fit is admitted.
        let third = limiter.check_tokens("user-1", 40);
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn stats_counts_requests_tokens_and_users() {
        let limiter = limiter(60_000, 10, 1_000);

        limiter.check_request("user-1");
        limiter.check_request("user-1");
        limiter.check_request("user-2");
        limiter.check_tokens("user-3", 250);

        let stats = limiter.stats();
        assert_eq!(stats.request_count, 3);
        assert_eq!(stats.token_count, 250);
        assert_eq!(stats.user_count, 3);
    }

    #[tokio::test]
    async fn prune_drops_drained_identifiers() {
        let limiter = limiter(30, 10, 1_000);

        limiter.check_request("user-1");
        limiter.check_tokens("user-2", 10);
        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.prune();

        assert_eq!(limiter.stats().user_count, 0);
    }
}
