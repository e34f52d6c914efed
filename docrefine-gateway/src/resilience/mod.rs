//! Resilience patterns around the completion dependency.
//!
//! - **Circuit Breaker**: stops calling a failing dependency for a cooldown
//!   period
//! - **Retry**: bounded retries with exponential backoff and jitter, gated
//!   by the breaker
//! - **Adaptive Timeout**: per-call deadlines derived from recent latencies

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitOpenRejection,
    CircuitState,
};
pub use retry::{RetryConfig, RetryError, RetryExecutor, RetryOutcome};
pub use timeout::{with_deadline, AdaptiveTimeout, AdaptiveTimeoutConfig};
