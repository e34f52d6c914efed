//! Circuit breaker guarding the completion dependency.
//!
//! The breaker monitors breaker-tripping failures (server errors, timeouts,
//! network faults, auth failures) and stops calling the dependency for a
//! cooldown period once they cross a threshold.
//!
//! # States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: too many failures, calls are rejected without reaching the
//!   dependency
//! - **HalfOpen**: recovery timeout elapsed, exactly one probe call is
//!   admitted
//!
//! A successful probe closes the circuit and fully resets the failure count;
//! a failed probe re-opens it immediately.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Breaker-tripping failures before the circuit opens
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is admitted
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Rejection issued while the circuit is open (or a probe is in flight).
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker is open for {name}")]
pub struct CircuitOpenRejection {
    pub name: String,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            probe_in_flight: false,
        }
    }
}

/// Point-in-time view of the breaker, exposed for status endpoints and probes.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Circuit breaker for one logical dependency.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
    opened_count: Arc<AtomicU64>,
    rejected_count: Arc<AtomicU64>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!("Creating circuit breaker: {}", name);

        Self {
            name,
            config,
            state: Arc::new(Mutex::new(BreakerState::new())),
            opened_count: Arc::new(AtomicU64::new(0)),
            rejected_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gate a call. Must be invoked before every attempt against the
    /// dependency.
    ///
    /// In `Open`, admits nothing until the recovery timeout has elapsed since
    /// the last failure, then transitions to `HalfOpen` and admits a single
    /// probe. In `HalfOpen`, rejects everything while the probe is in flight.
    pub async fn try_acquire(&self) -> Result<(), CircuitOpenRejection> {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let recovered = state
                    .last_failure
                    .map(|at| at.elapsed() > self.config.recovery_timeout)
                    .unwrap_or(true);

                if recovered {
                    info!("Circuit breaker {} transitioning to half-open", self.name);
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(())
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    Err(CircuitOpenRejection {
                        name: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    Err(CircuitOpenRejection {
                        name: self.name.clone(),
                    })
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// A successful half-open probe closes the circuit and fully resets the
    /// failure count, so stale counts cannot re-trip the breaker immediately.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker {} closing after successful probe", self.name);
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.probe_in_flight = false;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late.
                debug!("Late success while circuit breaker {} is open", self.name);
            }
        }
    }

    /// Record a failed call. `trips_breaker` comes from the error taxonomy;
    /// non-tripping failures (e.g. rate limiting) leave the failure count
    /// untouched.
    pub async fn record_failure(&self, trips_breaker: bool) {
        let mut state = self.state.lock().await;

        if !trips_breaker {
            // The probe resolved, just not in a way that says anything about
            // dependency health. Allow the next caller to probe again.
            if state.state == CircuitState::HalfOpen {
                state.probe_in_flight = false;
            }
            return;
        }

        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker {} opening after {} failures",
                        self.name, state.failure_count
                    );
                    state.state = CircuitState::Open;
                    self.opened_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "Circuit breaker {} re-opening after failed probe",
                    self.name
                );
                state.state = CircuitState::Open;
                state.probe_in_flight = false;
                self.opened_count.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.lock().await;
        CircuitBreakerSnapshot {
            state: state.state,
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
        }
    }

    /// Times the circuit opened over the breaker's lifetime.
    pub fn opened_count(&self) -> u64 {
        self.opened_count.load(Ordering::Relaxed)
    }

    /// Calls rejected without reaching the dependency.
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Manually reset to closed, clearing all failure bookkeeping.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        info!("Manually resetting circuit breaker: {}", self.name);
        *state = BreakerState::new();
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
