//! The completion gateway facade.
//!
//! Wires the admission gates, cache, retry executor, adaptive deadline, and
//! error-strategy manager into one entry point. A request passes, in order:
//! request-rate check, token-rate check, budget check, bulkhead admission,
//! cache lookup, then the deadline-bounded dependency call under retry with
//! circuit-breaker gating. Token spend is recorded and the response cached
//! only after the call succeeds.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docrefine_core::{CompletionClient, CompletionRequest};
//! use docrefine_gateway::config::GatewayConfig;
//! use docrefine_gateway::gateway::CompletionGateway;
//!
//! # async fn example(client: Arc<dyn CompletionClient>) -> anyhow::Result<()> {
//! let gateway = CompletionGateway::new(client, GatewayConfig::default()).await;
//!
//! let request = CompletionRequest::new("refine-1", "Draft text...", Default::default());
//! let outcome = gateway.process("user-42", &request).await?;
//! println!("refined: {}", outcome.response.content);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, warn};

use docrefine_core::domain::{CompletionRequest, CompletionResponse, TokenUsage};
use docrefine_core::error::CompletionError;
use docrefine_core::traits::{CacheStore, CompletionClient};

use crate::admission::{Bulkhead, SlidingWindowLimiter, TokenBudgetTracker};
use crate::admission::{BulkheadStats, RateLimiterStats};
use crate::cache::{CacheStats, InMemoryStore, TieredCache};
use crate::config::GatewayConfig;
use crate::degradation::{ErrorContext, ErrorStrategyManager, Fallback};
use crate::error::GatewayError;
use crate::observability::health::{HealthChecker, HealthProbe, HealthReport};
use crate::resilience::circuit_breaker::{CircuitBreakerSnapshot, CircuitState};
use crate::resilience::{with_deadline, AdaptiveTimeout, CircuitBreaker, RetryError, RetryExecutor};

const DEPENDENCY: &str = "completion_api";

/// Result of one gateway call
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub response: CompletionResponse,
    /// Dependency invocations made; 0 on a cache hit
    pub attempts: u32,
    pub from_cache: bool,
    /// True when the response is a fallback, not a real completion
    pub degraded: bool,
}

/// Health probe over the dependency's circuit breaker.
struct BreakerProbe {
    breaker: CircuitBreaker,
}

#[async_trait]
impl HealthProbe for BreakerProbe {
    async fn check(&self) -> Result<(), String> {
        match self.breaker.state().await {
            CircuitState::Open => Err("circuit breaker is open".to_string()),
            _ => Ok(()),
        }
    }
}

/// Resilience layer mediating all calls to the completion dependency.
pub struct CompletionGateway {
    client: Arc<dyn CompletionClient>,
    config: GatewayConfig,
    limiter: SlidingWindowLimiter,
    budget: TokenBudgetTracker,
    bulkhead: Bulkhead,
    cache: TieredCache<CompletionResponse>,
    retry: RetryExecutor,
    adaptive: Arc<AdaptiveTimeout>,
    strategy: Arc<ErrorStrategyManager>,
    health: HealthChecker,
}

impl CompletionGateway {
    /// Build a gateway backed by an in-process second cache tier.
    pub async fn new(client: Arc<dyn CompletionClient>, config: GatewayConfig) -> Self {
        Self::with_store(client, config, Arc::new(InMemoryStore::new())).await
    }

    /// Build a gateway with an explicit second cache tier (e.g. a shared
    /// key-value service).
    pub async fn with_store(
        client: Arc<dyn CompletionClient>,
        config: GatewayConfig,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let retry = RetryExecutor::new(DEPENDENCY, config.breaker.clone());
        let strategy = Arc::new(ErrorStrategyManager::new(config.strategy));
        let health = HealthChecker::new();

        health
            .register(
                "circuit_breaker",
                Arc::new(BreakerProbe {
                    breaker: retry.breaker(),
                }),
            )
            .await;
        {
            let strategy = Arc::clone(&strategy);
            health
                .register_fn("error_pressure", move || {
                    if strategy.is_service_healthy() {
                        Ok(())
                    } else {
                        Err("sustained critical errors".to_string())
                    }
                })
                .await;
        }

        Self {
            client,
            limiter: SlidingWindowLimiter::new(config.rate_limit),
            budget: TokenBudgetTracker::new(),
            bulkhead: Bulkhead::new(DEPENDENCY, config.bulkhead),
            cache: TieredCache::new(config.cache, store),
            adaptive: Arc::new(AdaptiveTimeout::new(config.timeout.clone())),
            retry,
            strategy,
            health,
            config,
        }
    }

    /// Run one completion request through every gate.
    pub async fn process(
        &self,
        identifier: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, GatewayError> {
        let decision = self.limiter.check_request(identifier);
        if !decision.allowed {
            counter!("gateway_rejections_total", "gate" => "request_rate").increment(1);
            return Err(GatewayError::RateLimited { decision });
        }

        let estimated = request.estimated_tokens();
        let token_decision = self.limiter.check_tokens(identifier, estimated);
        if !token_decision.allowed {
            counter!("gateway_rejections_total", "gate" => "token_rate").increment(1);
            return Err(GatewayError::RateLimited {
                decision: token_decision,
            });
        }

        let budget = self.budget.check_budget(
            identifier,
            estimated,
            self.config.daily_token_limit,
            self.config.monthly_token_limit,
        );
        if !budget.allowed {
            counter!("gateway_rejections_total", "gate" => "budget").increment(1);
            return Err(GatewayError::BudgetExceeded {
                reason: budget
                    .reason
                    .unwrap_or_else(|| "Token budget exceeded".to_string()),
                budget: budget.budget,
            });
        }

        let permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|source| GatewayError::Overloaded { source })?;

        let key = request.fingerprint();
        if let Some(response) = self.cache.get(&key).await {
            debug!(identifier, key = %key, "serving cached completion");
            return Ok(CompletionOutcome {
                response,
                attempts: 0,
                from_cache: true,
                degraded: false,
            });
        }

        let client = Arc::clone(&self.client);
        let adaptive = Arc::clone(&self.adaptive);
        let result = self
            .retry
            .execute_with_retry(&self.config.retry, "complete", || {
                let client = Arc::clone(&client);
                let adaptive = Arc::clone(&adaptive);
                async move {
                    // Derived fresh per attempt, so latencies recorded by
                    // concurrent calls widen later deadlines.
                    let deadline = adaptive.current_timeout();
                    let started = Instant::now();
                    let response = with_deadline(deadline, client.complete(request)).await?;
                    adaptive.record_response_time(started.elapsed());
                    Ok(response)
                }
            })
            .await;
        drop(permit);

        match result {
            Ok(outcome) => {
                self.budget
                    .record_spend(identifier, outcome.value.usage.total_tokens);
                self.cache.set(&key, outcome.value.clone(), None).await;
                counter!("gateway_completions_total", "result" => "success").increment(1);
                debug!(
                    identifier,
                    attempts = outcome.attempts,
                    tokens = outcome.value.usage.total_tokens,
                    "completion succeeded"
                );
                Ok(CompletionOutcome {
                    response: outcome.value,
                    attempts: outcome.attempts,
                    from_cache: false,
                    degraded: false,
                })
            }
            Err(RetryError::CircuitOpen { name }) => {
                counter!("gateway_completions_total", "result" => "circuit_open").increment(1);
                let synthetic = CompletionError::circuit_open(&name);
                self.strategy
                    .analyze(&synthetic, &self.context(identifier));
                Err(GatewayError::CircuitOpen { dependency: name })
            }
            Err(RetryError::Failed { attempts, source }) => {
                counter!(
                    "gateway_completions_total",
                    "result" => "upstream_failure",
                    "category" => source.category.to_string()
                )
                .increment(1);
                let strategy = self.strategy.analyze(&source, &self.context(identifier));
                warn!(
                    identifier,
                    attempts,
                    category = %source.category,
                    internal = %strategy.internal_message,
                    "completion failed"
                );
                Err(GatewayError::Upstream {
                    user_message: strategy.user_message,
                    severity: strategy.severity,
                    attempts,
                    source,
                })
            }
        }
    }

    /// Like [`process`](Self::process), but resolves the error category's
    /// fallback directive: when the strategy names
    /// [`Fallback::OriginalContent`], the caller's input is returned
    /// unmodified as a degraded outcome instead of an error.
    pub async fn process_with_fallback(
        &self,
        identifier: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, GatewayError> {
        let error = match self.process(identifier, request).await {
            Ok(outcome) => return Ok(outcome),
            Err(error) => error,
        };

        let (category, attempts) = match &error {
            GatewayError::CircuitOpen { .. } => {
                (Some(docrefine_core::ErrorCategory::CircuitOpen), 0)
            }
            GatewayError::Upstream {
                source, attempts, ..
            } => (Some(source.category), *attempts),
            _ => (None, 0),
        };

        if let Some(category) = category {
            if self.strategy.fallback_for(category) == Some(Fallback::OriginalContent) {
                warn!(identifier, %category, "returning original content as fallback");
                counter!("gateway_completions_total", "result" => "degraded").increment(1);
                let response = CompletionResponse::new(
                    request.model.clone(),
                    request.content.clone(),
                    TokenUsage::new(0, 0),
                );
                return Ok(CompletionOutcome {
                    response,
                    attempts,
                    from_cache: false,
                    degraded: true,
                });
            }
        }

        Err(error)
    }

    fn context(&self, identifier: &str) -> ErrorContext {
        ErrorContext::new("complete").with_identifier(identifier)
    }

    /// Run all registered health probes.
    pub async fn run_health_checks(&self) -> HealthReport {
        self.health.run_checks().await
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub async fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.retry.breaker_snapshot().await
    }

    pub fn limiter_stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn bulkhead_stats(&self) -> BulkheadStats {
        self.bulkhead.stats()
    }

    pub fn strategy(&self) -> &ErrorStrategyManager {
        &self.strategy
    }

    /// Drop the in-process cache tier and prune limiter state. The shared
    /// store tier is left for other nodes.
    pub async fn shutdown(&self) {
        self.cache.clear_local();
        self.limiter.prune();
        info!("gateway shut down");
    }
}
