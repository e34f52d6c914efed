//! Retry executor with exponential backoff, jitter, and circuit-breaker
//! gating.
//!
//! Every attempt is gated by the dependency's circuit breaker; failures are
//! classified through the error taxonomy to decide whether to retry and
//! whether they count toward tripping the breaker.
//!
//! # Example
//!
//! ```no_run
//! use docrefine_gateway::resilience::retry::{RetryConfig, RetryExecutor};
//! use docrefine_gateway::resilience::circuit_breaker::CircuitBreakerConfig;
//! use docrefine_core::{CompletionError, ErrorCategory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = RetryExecutor::new("completion_api", CircuitBreakerConfig::default());
//!
//! let outcome = executor
//!     .execute_with_retry(&RetryConfig::default(), "reshape_document", || async {
//!         Ok::<_, CompletionError>(42)
//!     })
//!     .await?;
//!
//! assert_eq!(outcome.value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use docrefine_core::CompletionError;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` means no retries but
    /// circuit-breaker bookkeeping still applies.
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a uniform factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before the retry that follows `attempt` (1-based), jitter not
    /// applied: `min(max_delay, base_delay × multiplier^(attempt-1))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Rejected without reaching the dependency; distinct from any
    /// dependency-derived error so callers can special-case it.
    #[error("circuit breaker is open for {name}")]
    CircuitOpen { name: String },

    /// Attempts exhausted or a non-retryable failure; carries the last
    /// underlying error.
    #[error("operation failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: CompletionError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::CircuitOpen { .. } => 0,
            RetryError::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Successful result plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Total invocations of the operation, including the successful one.
    pub attempts: u32,
}

/// Retry executor owning the circuit breaker for one logical dependency.
#[derive(Clone)]
pub struct RetryExecutor {
    breaker: CircuitBreaker,
}

impl RetryExecutor {
    pub fn new(dependency: impl Into<String>, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(dependency, breaker_config),
        }
    }

    /// Shared handle to the underlying breaker, e.g. for health probes.
    pub fn breaker(&self) -> CircuitBreaker {
        self.breaker.clone()
    }

    pub async fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot().await
    }

    /// Run `op` with bounded retries under circuit-breaker protection.
    ///
    /// The breaker is consulted before every attempt. Retryable failures
    /// back off exponentially; non-retryable failures and exhausted attempts
    /// surface the last underlying error.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        config: &RetryConfig,
        label: &str,
        mut op: F,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            self.breaker
                .try_acquire()
                .await
                .map_err(|rejection| RetryError::CircuitOpen {
                    name: rejection.name,
                })?;

            debug!(
                operation = label,
                attempt,
                max_attempts = config.max_attempts,
                "attempting operation"
            );

            match op().await {
                Ok(value) => {
                    self.breaker.record_success().await;
                    if attempt > 1 {
                        debug!(operation = label, attempt, "operation recovered");
                    }
                    return Ok(RetryOutcome { value, attempts: attempt });
                }
                Err(err) => {
                    self.breaker.record_failure(err.trips_breaker()).await;

                    if !err.is_retryable() {
                        warn!(
                            operation = label,
                            category = %err.category,
                            "failure is not retryable, giving up"
                        );
                        return Err(RetryError::Failed {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    if attempt >= config.max_attempts {
                        warn!(operation = label, attempt, "retry attempts exhausted");
                        return Err(RetryError::Failed {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    // The provider may tell us exactly how long to wait;
                    // the hint is still subject to the max_delay ceiling.
                    let delay = err
                        .retry_after
                        .map(|hint| hint.min(config.max_delay))
                        .unwrap_or_else(|| config.apply_jitter(config.delay_for_attempt(attempt)));
                    debug!(operation = label, attempt, delay = ?delay, "retrying after backoff");
                    sleep(delay).await;
                }
            }
        }
    }
}
