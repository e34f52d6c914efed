//! End-to-end tests running completion requests through every gateway gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;
use tokio_test::assert_ok;

use docrefine_core::domain::{
    CompletionOptions, CompletionRequest, CompletionResponse, TokenUsage,
};
use docrefine_core::error::CompletionError;
use docrefine_core::traits::CompletionClient;
use docrefine_gateway::config::GatewayConfig;
use docrefine_gateway::gateway::CompletionGateway;
use docrefine_gateway::resilience::CircuitState;
use docrefine_gateway::GatewayError;

// ===== Test Clients =====

/// Pops one scripted result per call, repeating the last.
struct ScriptedClient {
    script: Vec<Result<CompletionResponse, CompletionError>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(script: Vec<Result<CompletionResponse, CompletionError>>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    fn always_ok() -> Self {
        Self::new(vec![Ok(ok_response())])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script[index.min(self.script.len() - 1)].clone()
    }
}

/// Blocks every call until the test hands out a permit.
struct GatedClient {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl CompletionClient for GatedClient {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| CompletionError::from_status(500, "gate closed"))?;
        permit.forget();
        Ok(ok_response())
    }
}

// ===== Helpers =====

fn ok_response() -> CompletionResponse {
    CompletionResponse::new("refine-1", "refined text", TokenUsage::new(120, 80))
}

fn request(content: &str) -> CompletionRequest {
    CompletionRequest::new("refine-1", content, CompletionOptions::default())
}

fn fast_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.retry.base_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

// ===== Retry and Breaker =====

#[tokio::test]
async fn recovers_after_transient_outage_without_tripping_breaker() {
    let client = Arc::new(ScriptedClient::new(vec![
        Err(CompletionError::from_status(503, "unavailable")),
        Err(CompletionError::from_status(503, "unavailable")),
        Err(CompletionError::from_status(503, "unavailable")),
        Ok(ok_response()),
    ]));
    let mut config = fast_config();
    config.retry.max_attempts = 4;
    let gateway = CompletionGateway::new(client.clone(), config).await;

    let outcome = assert_ok!(gateway.process("user-1", &request("draft")).await);

    assert_eq!(outcome.attempts, 4);
    assert_eq!(client.calls(), 4);
    assert!(!outcome.from_cache);

    let snapshot = gateway.breaker_snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn sustained_failures_open_the_breaker_and_fail_fast() {
    let client = Arc::new(ScriptedClient::new(vec![Err(
        CompletionError::from_status(500, "boom"),
    )]));
    let mut config = fast_config();
    config.retry.max_attempts = 5;
    config.breaker.failure_threshold = 3;
    let gateway = CompletionGateway::new(client.clone(), config).await;

    let err = gateway.process("user-1", &request("draft")).await.unwrap_err();
    // The third failure tripped the breaker mid-loop; the fourth attempt
    // never reached the dependency.
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(client.calls(), 3);

    // Fail fast while open: the dependency call count stays constant.
    let err = gateway.process("user-1", &request("other")).await.unwrap_err();
    assert_eq!(err.code(), "circuit_open");
    assert_eq!(client.calls(), 3);
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probe() {
    let client = Arc::new(ScriptedClient::new(vec![
        Err(CompletionError::from_status(500, "boom")),
        Err(CompletionError::from_status(500, "boom")),
        Ok(ok_response()),
    ]));
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.breaker.failure_threshold = 2;
    config.breaker.recovery_timeout = Duration::from_millis(40);
    let gateway = CompletionGateway::new(client.clone(), config).await;

    let _ = gateway.process("user-1", &request("a")).await;
    let _ = gateway.process("user-1", &request("b")).await;
    assert_eq!(gateway.breaker_snapshot().await.state, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(60)).await;

    // The recovery timeout elapsed; the next call is the single probe.
    let outcome = gateway.process("user-1", &request("c")).await.unwrap();
    assert_eq!(outcome.attempts, 1);

    let snapshot = gateway.breaker_snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

// ===== Rate Limiting =====

#[tokio::test]
async fn window_limit_rejects_the_overflow_request() {
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = fast_config();
    config.rate_limit.max_requests = 100;
    config.rate_limit.window = Duration::from_millis(60_000);
    // Keep the other gates out of the way.
    config.rate_limit.max_tokens = u64::MAX;
    config.daily_token_limit = u64::MAX;
    config.monthly_token_limit = u64::MAX;
    let gateway = CompletionGateway::new(client, config).await;

    for i in 0..100 {
        let result = gateway
            .process("user-1", &request(&format!("doc {i}")))
            .await;
        assert!(result.is_ok(), "request {i} should be admitted");
    }

    let err = gateway
        .process("user-1", &request("doc 100"))
        .await
        .unwrap_err();
    match err {
        GatewayError::RateLimited { decision } => {
            assert!(!decision.allowed);
            assert_eq!(decision.remaining, 0);
            assert_eq!(decision.limit, 100);
            // Window anchored at the oldest surviving request.
            assert!(decision.reset_after <= Duration::from_millis(60_000));
            assert!(decision.reset_after > Duration::from_millis(55_000));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limits_are_per_identifier() {
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = fast_config();
    config.rate_limit.max_requests = 1;
    let gateway = CompletionGateway::new(client, config).await;

    assert!(gateway.process("user-1", &request("a")).await.is_ok());
    assert!(gateway.process("user-1", &request("b")).await.is_err());
    assert!(gateway.process("user-2", &request("c")).await.is_ok());
}

// ===== Token Budgets =====

#[tokio::test]
async fn daily_budget_is_reported_before_monthly() {
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = fast_config();
    // Both ceilings far below one request's estimate; daily must win.
    config.daily_token_limit = 10;
    config.monthly_token_limit = 10;
    let gateway = CompletionGateway::new(client, config).await;

    let err = gateway.process("user-1", &request("draft")).await.unwrap_err();
    match err {
        GatewayError::BudgetExceeded { reason, budget } => {
            assert_eq!(reason, "Daily token limit exceeded");
            assert_eq!(budget.daily_used, 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn recorded_spend_counts_against_later_budget_checks() {
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = fast_config();
    // Room for one request's estimate, but not for a second one once the
    // first call's actual spend (200 tokens) is on the books.
    config.daily_token_limit = request("seed").estimated_tokens() + 100;
    let gateway = CompletionGateway::new(client, config).await;

    assert!(gateway.process("user-1", &request("seed")).await.is_ok());

    let err = gateway.process("user-1", &request("more")).await.unwrap_err();
    assert!(matches!(err, GatewayError::BudgetExceeded { .. }));
}

// ===== Bulkhead =====

#[tokio::test]
async fn third_concurrent_call_is_rejected_then_admitted_after_release() {
    let gate = Arc::new(Semaphore::new(0));
    let client = Arc::new(GatedClient { gate: gate.clone() });
    let mut config = fast_config();
    config.bulkhead.max_concurrent = 2;
    config.bulkhead.max_queue_size = 0;
    let gateway = Arc::new(CompletionGateway::new(client, config).await);

    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.process("user-1", &request("one")).await })
    };
    let second = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.process("user-1", &request("two")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(gateway.bulkhead_stats().active, 2);

    let err = gateway.process("user-1", &request("three")).await.unwrap_err();
    assert_eq!(err.code(), "overloaded");

    // Let the first two finish; a slot frees up.
    gate.add_permits(2);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    gate.add_permits(1);
    assert!(gateway.process("user-1", &request("four")).await.is_ok());
}

// ===== Adaptive Deadlines =====

/// Routes by request content: "warm" calls succeed after 50ms, the "main"
/// call fails once and then needs 150ms to complete.
struct MixedLatencyClient {
    main_calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for MixedLatencyClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        if request.content == "warm" {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return Ok(ok_response());
        }
        if self.main_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(CompletionError::from_status(503, "unavailable"))
        } else {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(ok_response())
        }
    }
}

#[tokio::test]
async fn retry_attempts_use_freshly_derived_deadlines() {
    let client = Arc::new(MixedLatencyClient {
        main_calls: AtomicUsize::new(0),
    });
    let mut config = fast_config();
    config.retry.max_attempts = 2;
    config.retry.base_delay = Duration::from_millis(100);
    config.retry.max_delay = Duration::from_millis(200);
    config.timeout.base_timeout = Duration::from_millis(100);
    config.timeout.multiplier = 4.0;
    let gateway = Arc::new(CompletionGateway::new(client, config).await);

    // Completes during the main call's backoff, recording a ~50ms sample
    // that raises the derived deadline to ~200ms.
    let warm = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.process("user-2", &request("warm")).await })
    };

    // Attempt 1 fails fast; attempt 2 needs 150ms, which only fits a
    // deadline derived after the warm call's sample landed.
    let outcome = gateway.process("user-1", &request("main")).await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert!(warm.await.unwrap().is_ok());
}

// ===== Cache =====

#[tokio::test]
async fn identical_requests_hit_the_cache_across_users() {
    let client = Arc::new(ScriptedClient::always_ok());
    let gateway = CompletionGateway::new(client.clone(), fast_config()).await;

    let first = gateway.process("user-1", &request("shared doc")).await.unwrap();
    let second = gateway.process("user-2", &request("shared doc")).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.response.content, first.response.content);
    assert_eq!(client.calls(), 1);

    let stats = gateway.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.sets, 1);
}

#[tokio::test]
async fn expired_cache_entry_reaches_the_dependency_again() {
    let client = Arc::new(ScriptedClient::always_ok());
    let mut config = fast_config();
    config.cache.default_ttl = Duration::from_millis(40);
    config.cache.memory.ttl_ceiling = Duration::from_millis(40);
    let gateway = CompletionGateway::new(client.clone(), config).await;

    gateway.process("user-1", &request("doc")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let again = gateway.process("user-1", &request("doc")).await.unwrap();
    assert!(!again.from_cache);
    assert_eq!(client.calls(), 2);
}

// ===== Degradation and Health =====

#[tokio::test]
async fn unavailable_model_falls_back_to_original_content() {
    let client = Arc::new(ScriptedClient::new(vec![Err(
        CompletionError::from_status(503, "model down"),
    )]));
    let mut config = fast_config();
    config.retry.max_attempts = 2;
    let gateway = CompletionGateway::new(client, config).await;

    let outcome = gateway
        .process_with_fallback("user-1", &request("keep my words"))
        .await
        .unwrap();

    assert!(outcome.degraded);
    assert_eq!(outcome.response.content, "keep my words");
}

#[tokio::test]
async fn health_report_reflects_an_open_breaker() {
    let client = Arc::new(ScriptedClient::new(vec![Err(
        CompletionError::from_status(500, "boom"),
    )]));
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.breaker.failure_threshold = 1;
    let gateway = CompletionGateway::new(client, config).await;

    assert!(gateway.run_health_checks().await.healthy);

    let _ = gateway.process("user-1", &request("draft")).await;
    let report = gateway.run_health_checks().await;

    assert!(!report.healthy);
    assert!(!report.checks["circuit_breaker"].healthy);
    assert!(report.checks.contains_key("error_pressure"));
}
