use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Closed taxonomy for failures of the completion dependency.
///
/// Every category carries a fixed retry and circuit-breaking disposition, so
/// the resilience layer can make control-flow decisions with a total match
/// instead of sniffing error shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimited,
    QuotaExceeded,
    ModelUnavailable,
    ContentRejected,
    ContextTooLarge,
    AuthenticationFailed,
    ServerError,
    NetworkError,
    Timeout,
    CircuitOpen,
    Unknown,
}

impl ErrorCategory {
    /// Whether the retry executor may re-attempt this failure locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
                | ErrorCategory::ModelUnavailable
                | ErrorCategory::ServerError
                | ErrorCategory::NetworkError
                | ErrorCategory::Timeout
        )
    }

    /// Whether this failure counts toward tripping the circuit breaker.
    ///
    /// Rate limiting is the dependency telling us to slow down, not that it
    /// is unhealthy, so it never trips the breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ErrorCategory::ModelUnavailable
                | ErrorCategory::AuthenticationFailed
                | ErrorCategory::ServerError
                | ErrorCategory::NetworkError
                | ErrorCategory::Timeout
        )
    }

    /// Total mapping from the structural features of a provider failure
    /// (status-like code plus message text) into the taxonomy.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lowered = message.to_lowercase();

        if let Some(code) = status {
            match code {
                401 | 403 => return ErrorCategory::AuthenticationFailed,
                402 => return ErrorCategory::QuotaExceeded,
                413 => return ErrorCategory::ContextTooLarge,
                429 => {
                    if lowered.contains("quota") || lowered.contains("budget") {
                        return ErrorCategory::QuotaExceeded;
                    }
                    return ErrorCategory::RateLimited;
                }
                503 => return ErrorCategory::ModelUnavailable,
                500 | 502 | 504..=599 => return ErrorCategory::ServerError,
                400 | 422 => {
                    if lowered.contains("too large")
                        || lowered.contains("context length")
                        || lowered.contains("maximum context")
                    {
                        return ErrorCategory::ContextTooLarge;
                    }
                    if lowered.contains("content")
                        || lowered.contains("safety")
                        || lowered.contains("filtered")
                    {
                        return ErrorCategory::ContentRejected;
                    }
                    return ErrorCategory::Unknown;
                }
                404 if lowered.contains("model") => return ErrorCategory::ModelUnavailable,
                _ => {}
            }
        }

        if lowered.contains("timeout") || lowered.contains("timed out") {
            ErrorCategory::Timeout
        } else if lowered.contains("rate limit") {
            ErrorCategory::RateLimited
        } else if lowered.contains("too large") || lowered.contains("context length") {
            ErrorCategory::ContextTooLarge
        } else if lowered.contains("connection")
            || lowered.contains("network")
            || lowered.contains("dns")
        {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::ModelUnavailable => "model_unavailable",
            ErrorCategory::ContentRejected => "content_rejected",
            ErrorCategory::ContextTooLarge => "context_too_large",
            ErrorCategory::AuthenticationFailed => "authentication_failed",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Typed failure returned by the completion client.
///
/// Carries a numeric status-like code, a message, and an optional retry-after
/// hint. The resilience layer never inspects payload semantics, only this
/// shape.
#[derive(Debug, Clone, Error)]
#[error("{category}: {message}")]
pub struct CompletionError {
    pub category: ErrorCategory,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl CompletionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from a raw provider response, classifying it into the
    /// taxonomy at the collaborator boundary.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category: ErrorCategory::classify(Some(status), &message),
            status: Some(status),
            message,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Synthetic breaker-open failure, not derived from any dependency error.
    pub fn circuit_open(dependency: &str) -> Self {
        Self::new(
            ErrorCategory::CircuitOpen,
            format!("circuit breaker open for {}", dependency),
        )
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("operation timed out after {:?}", elapsed),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    pub fn trips_breaker(&self) -> bool {
        self.category.trips_breaker()
    }
}

pub type Result<T> = std::result::Result<T, CompletionError>;
