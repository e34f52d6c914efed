//! Error analysis and graceful degradation.
//!
//! Every terminal failure is mapped to a [`RecoveryStrategy`]: a fixed
//! per-category recipe carrying a user-safe message, an internal diagnostic,
//! an optional recovery action, and an optional fallback directive. The
//! manager also keeps bounded per-category histories so sustained error
//! rates escalate severity upward (never downward) and feed the
//! service-health signal.
//!
//! Severity affects messaging and alerting only; retryability is fixed by
//! the category and never changes with escalation.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use docrefine_core::error::{CompletionError, ErrorCategory};

/// Where and for whom an error occurred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            identifier: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// How urgent a failure is, for alerting and messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A step worth attempting before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Wait out a transient condition, then retry the operation once
    WaitAndRetry(Duration),
}

/// Directive for what to hand the caller when the operation cannot succeed.
/// Resolution is the caller's job; the manager only names the directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fallback {
    /// Return the caller's input unmodified instead of a refined version
    OriginalContent,
}

/// The recipe attached to one analyzed failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub category: ErrorCategory,
    pub can_recover: bool,
    pub severity: Severity,
    pub user_message: String,
    pub internal_message: String,
    pub recovery_action: Option<RecoveryAction>,
    pub fallback: Option<Fallback>,
}

/// Terminal failure after degradation options are exhausted.
///
/// Carries only the user-safe message; the internal diagnostic stays in the
/// source error and the log line.
#[derive(Debug, thiserror::Error)]
#[error("{user_message}")]
pub struct DegradedFailure {
    pub user_message: String,
    pub severity: Severity,
    #[source]
    pub source: CompletionError,
}

/// How a degraded operation ultimately resolved
#[derive(Debug)]
pub enum DegradationOutcome<T> {
    /// The operation (or its one recovery retry) succeeded
    Completed(T),
    /// The category's fallback directive, for the caller to resolve
    Fallback(Fallback),
    /// The caller-supplied fallback value was used
    Substituted(T),
}

/// Tuning knobs for escalation and health derivation
#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    /// Events per category per `escalation_window` before severity becomes High
    pub high_threshold: usize,
    /// Events per category per `escalation_window` before severity becomes Critical
    pub critical_threshold: usize,
    pub escalation_window: Duration,
    /// Trailing window for the service-health signal
    pub health_window: Duration,
    /// Critical-category events inside `health_window` before unhealthy
    pub health_threshold: usize,
    /// Per-category history ring size
    pub history_cap: usize,
    /// Ceiling on any single recovery wait
    pub max_recovery_wait: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            high_threshold: 10,
            critical_threshold: 25,
            escalation_window: Duration::from_secs(3600),
            health_window: Duration::from_secs(300),
            health_threshold: 3,
            history_cap: 256,
            max_recovery_wait: Duration::from_secs(30),
        }
    }
}

/// Categories that indicate the service itself is in trouble, not just one
/// request.
const CRITICAL_CATEGORIES: [ErrorCategory; 3] = [
    ErrorCategory::AuthenticationFailed,
    ErrorCategory::CircuitOpen,
    ErrorCategory::QuotaExceeded,
];

/// Maps failures to recovery strategies and tracks error pressure.
pub struct ErrorStrategyManager {
    config: StrategyConfig,
    history: DashMap<ErrorCategory, VecDeque<DateTime<Utc>>>,
}

impl ErrorStrategyManager {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
        }
    }

    /// Classify `error`, record it, and return the (possibly escalated)
    /// strategy.
    pub fn analyze(&self, error: &CompletionError, context: &ErrorContext) -> RecoveryStrategy {
        let mut strategy = self.base_strategy(error);

        let recent = self.record(strategy.category);
        if recent > self.config.critical_threshold && strategy.severity < Severity::Critical {
            strategy.severity = Severity::Critical;
            strategy.user_message =
                "The service is experiencing sustained problems. Please try again later."
                    .to_string();
        } else if recent > self.config.high_threshold && strategy.severity < Severity::High {
            strategy.severity = Severity::High;
            strategy.user_message =
                "The service is experiencing elevated errors. Please try again later.".to_string();
        }

        debug!(
            operation = %context.operation,
            category = %strategy.category,
            severity = ?strategy.severity,
            recent,
            "error analyzed"
        );

        strategy
    }

    /// False when critical-category error pressure inside the trailing
    /// health window exceeds the threshold.
    pub fn is_service_healthy(&self) -> bool {
        let cutoff = Utc::now() - chrono_duration(self.config.health_window);
        let mut critical_events = 0usize;
        for category in CRITICAL_CATEGORIES {
            if let Some(ring) = self.history.get(&category) {
                critical_events += ring.iter().filter(|ts| **ts > cutoff).count();
            }
        }
        critical_events <= self.config.health_threshold
    }

    /// Run `operation`; on failure, attempt the strategy's recovery action
    /// once, then fall back.
    ///
    /// Resolution order on a failed (or unrecovered) operation: the
    /// strategy's fallback directive, then the caller-supplied `fallback`,
    /// then a [`DegradedFailure`] carrying the user-safe message.
    pub async fn with_graceful_degradation<T, F, Fut>(
        &self,
        operation: F,
        context: &ErrorContext,
        fallback: Option<T>,
    ) -> Result<DegradationOutcome<T>, DegradedFailure>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CompletionError>>,
    {
        let error = match operation().await {
            Ok(value) => return Ok(DegradationOutcome::Completed(value)),
            Err(error) => error,
        };

        let strategy = self.analyze(&error, context);

        if strategy.can_recover {
            if let Some(RecoveryAction::WaitAndRetry(wait)) = strategy.recovery_action {
                let wait = wait.min(self.config.max_recovery_wait);
                debug!(
                    operation = %context.operation,
                    wait_ms = wait.as_millis() as u64,
                    "attempting recovery"
                );
                tokio::time::sleep(wait).await;
                if let Ok(value) = operation().await {
                    return Ok(DegradationOutcome::Completed(value));
                }
            }
        }

        warn!(
            operation = %context.operation,
            category = %strategy.category,
            internal = %strategy.internal_message,
            "operation degraded"
        );

        if let Some(directive) = strategy.fallback {
            return Ok(DegradationOutcome::Fallback(directive));
        }
        if let Some(value) = fallback {
            return Ok(DegradationOutcome::Substituted(value));
        }
        Err(DegradedFailure {
            user_message: strategy.user_message,
            severity: strategy.severity,
            source: error,
        })
    }

    /// The category's fallback directive, without recording an event.
    pub fn fallback_for(&self, category: ErrorCategory) -> Option<Fallback> {
        self.base_strategy(&CompletionError::new(category, "")).fallback
    }

    fn base_strategy(&self, error: &CompletionError) -> RecoveryStrategy {
        let category = error.category;
        let internal_message = error.to_string();

        let (can_recover, severity, user_message, recovery_action, fallback) = match category {
            ErrorCategory::RateLimited => (
                true,
                Severity::Medium,
                "The service is busy right now. Please try again shortly.",
                Some(RecoveryAction::WaitAndRetry(
                    error.retry_after.unwrap_or(Duration::from_secs(30)),
                )),
                None,
            ),
            ErrorCategory::QuotaExceeded => (
                false,
                Severity::High,
                "Your usage limit has been reached.",
                None,
                None,
            ),
            ErrorCategory::ModelUnavailable => (
                true,
                Severity::High,
                "The refinement service is temporarily unavailable.",
                Some(RecoveryAction::WaitAndRetry(Duration::from_secs(5))),
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::ContentRejected => (
                false,
                Severity::Medium,
                "This document could not be processed.",
                None,
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::ContextTooLarge => (
                false,
                Severity::Medium,
                "This document is too large to refine in one pass.",
                None,
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::AuthenticationFailed => (
                false,
                Severity::Critical,
                "A service configuration problem occurred. Please contact support.",
                None,
                None,
            ),
            ErrorCategory::ServerError => (
                true,
                Severity::High,
                "Something went wrong upstream. Please try again.",
                Some(RecoveryAction::WaitAndRetry(Duration::from_secs(2))),
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::NetworkError => (
                true,
                Severity::Medium,
                "A network problem interrupted the request. Please try again.",
                Some(RecoveryAction::WaitAndRetry(Duration::from_secs(1))),
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::Timeout => (
                true,
                Severity::Medium,
                "The request took too long. Please try again.",
                Some(RecoveryAction::WaitAndRetry(Duration::from_secs(1))),
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::CircuitOpen => (
                false,
                Severity::High,
                "The service is temporarily degraded. Please try again in a minute.",
                None,
                Some(Fallback::OriginalContent),
            ),
            ErrorCategory::Unknown => (
                false,
                Severity::Medium,
                "An unexpected problem occurred. Please try again.",
                None,
                None,
            ),
        };

        RecoveryStrategy {
            category,
            can_recover,
            severity,
            user_message: user_message.to_string(),
            internal_message,
            recovery_action,
            fallback,
        }
    }

    /// Append an event to the category's ring and return how many land
    /// inside the escalation window.
    fn record(&self, category: ErrorCategory) -> usize {
        let now = Utc::now();
        let cutoff = now - chrono_duration(self.config.escalation_window);

        let mut entry = self.history.entry(category).or_default();
        let ring = entry.value_mut();
        ring.push_back(now);
        while ring.len() > self.config.history_cap {
            ring.pop_front();
        }
        ring.iter().filter(|ts| **ts > cutoff).count()
    }
}

impl Default for ErrorStrategyManager {
    fn default() -> Self {
        Self::new(StrategyConfig::default())
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1))
}
