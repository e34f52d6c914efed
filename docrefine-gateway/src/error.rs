//! Terminal failures surfaced by the gateway.
//!
//! Every variant yields a stable `(code, user_message)` pair. Internal
//! diagnostics stay in the wrapped source error and the log line; the user
//! message never carries dependency-specific detail.

use docrefine_core::error::CompletionError;

use crate::admission::{BudgetUsage, BulkheadError, RateLimitDecision};
use crate::degradation::Severity;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Sliding-window request or token-rate ceiling reached
    #[error("rate limit exceeded, retry in {:?}", decision.reset_after)]
    RateLimited { decision: RateLimitDecision },

    /// Calendar-period token budget exhausted
    #[error("{reason}")]
    BudgetExceeded { reason: String, budget: BudgetUsage },

    /// Bulkhead slots and queue both full
    #[error("gateway is at capacity")]
    Overloaded {
        #[source]
        source: BulkheadError,
    },

    /// Synthetic breaker-open rejection; the dependency was never called
    #[error("circuit breaker is open for {dependency}")]
    CircuitOpen { dependency: String },

    /// The dependency call failed after retries were exhausted or the
    /// failure was not retryable
    #[error("{user_message}")]
    Upstream {
        user_message: String,
        severity: Severity,
        attempts: u32,
        #[source]
        source: CompletionError,
    },
}

impl GatewayError {
    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::BudgetExceeded { .. } => "budget_exceeded",
            GatewayError::Overloaded { .. } => "overloaded",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Upstream { .. } => "upstream_failure",
        }
    }

    /// User-safe message, free of internal diagnostics.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::RateLimited { decision } => format!(
                "Too many requests. Please retry in {} seconds.",
                decision.reset_after.as_secs().max(1)
            ),
            GatewayError::BudgetExceeded { reason, .. } => reason.clone(),
            GatewayError::Overloaded { .. } => {
                "The service is at capacity. Please try again shortly.".to_string()
            }
            GatewayError::CircuitOpen { .. } => {
                "The service is temporarily degraded. Please try again in a minute.".to_string()
            }
            GatewayError::Upstream { user_message, .. } => user_message.clone(),
        }
    }
}
