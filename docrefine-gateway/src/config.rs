//! Gateway configuration.
//!
//! Settings load from `config/default` and `config/local` files (optional)
//! plus environment variables prefixed `DOCREFINE` (for example
//! `DOCREFINE__RETRY__MAX_ATTEMPTS=5`). The serde-facing structs use plain
//! millisecond integers; [`GatewaySettings::into_config`] converts them into
//! the typed configs the components take.

use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admission::{BulkheadConfig, RateLimiterConfig};
use crate::cache::{MemoryCacheConfig, TieredCacheConfig};
use crate::degradation::StrategyConfig;
use crate::resilience::{AdaptiveTimeoutConfig, CircuitBreakerConfig, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            multiplier: defaults.multiplier,
            jitter: defaults.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            recovery_timeout_ms: defaults.recovery_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub max_requests: u32,
    pub max_tokens: u64,
    /// Daily token ceiling applied per identifier
    pub daily_token_limit: u64,
    /// Monthly token ceiling applied per identifier
    pub monthly_token_limit: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let defaults = RateLimiterConfig::default();
        Self {
            window_ms: defaults.window.as_millis() as u64,
            max_requests: defaults.max_requests,
            max_tokens: defaults.max_tokens,
            daily_token_limit: 500_000,
            monthly_token_limit: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        let defaults = BulkheadConfig::default();
        Self {
            max_concurrent: defaults.max_concurrent,
            max_queue_size: defaults.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub base_timeout_ms: u64,
    pub multiplier: f64,
    pub sample_capacity: usize,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let defaults = AdaptiveTimeoutConfig::default();
        Self {
            base_timeout_ms: defaults.base_timeout.as_millis() as u64,
            multiplier: defaults.multiplier,
            sample_capacity: defaults.sample_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_ms: u64,
    pub backfill_ttl_ms: u64,
    pub max_entries: usize,
    pub memory_ttl_ceiling_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = TieredCacheConfig::default();
        Self {
            default_ttl_ms: defaults.default_ttl.as_millis() as u64,
            backfill_ttl_ms: defaults.backfill_ttl.as_millis() as u64,
            max_entries: defaults.memory.max_entries,
            memory_ttl_ceiling_ms: defaults.memory.ttl_ceiling.as_millis() as u64,
        }
    }
}

/// Complete gateway settings as loaded from files and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub bulkhead: BulkheadSettings,
    pub timeout: TimeoutSettings,
    pub cache: CacheSettings,
    pub logging: crate::observability::LogConfig,
}

/// Typed configuration handed to the gateway constructor.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimiterConfig,
    pub daily_token_limit: u64,
    pub monthly_token_limit: u64,
    pub bulkhead: BulkheadConfig,
    pub timeout: AdaptiveTimeoutConfig,
    pub cache: TieredCacheConfig,
    pub strategy: StrategyConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewaySettings::default().into_config()
    }
}

impl GatewaySettings {
    /// Load from `config/default`, `config/local`, then `DOCREFINE`-prefixed
    /// environment variables, later sources winning.
    pub fn load() -> Result<Self> {
        let loader = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("DOCREFINE").separator("__"))
            .build()?;

        Ok(loader.try_deserialize()?)
    }

    pub fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                max_delay: Duration::from_millis(self.retry.max_delay_ms),
                multiplier: self.retry.multiplier,
                jitter: self.retry.jitter,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                recovery_timeout: Duration::from_millis(self.breaker.recovery_timeout_ms),
            },
            rate_limit: RateLimiterConfig {
                window: Duration::from_millis(self.rate_limit.window_ms),
                max_requests: self.rate_limit.max_requests,
                max_tokens: self.rate_limit.max_tokens,
            },
            daily_token_limit: self.rate_limit.daily_token_limit,
            monthly_token_limit: self.rate_limit.monthly_token_limit,
            bulkhead: BulkheadConfig {
                max_concurrent: self.bulkhead.max_concurrent,
                max_queue_size: self.bulkhead.max_queue_size,
            },
            timeout: AdaptiveTimeoutConfig {
                base_timeout: Duration::from_millis(self.timeout.base_timeout_ms),
                multiplier: self.timeout.multiplier,
                sample_capacity: self.timeout.sample_capacity,
            },
            cache: TieredCacheConfig {
                default_ttl: Duration::from_millis(self.cache.default_ttl_ms),
                backfill_ttl: Duration::from_millis(self.cache.backfill_ttl_ms),
                memory: MemoryCacheConfig {
                    max_entries: self.cache.max_entries,
                    ttl_ceiling: Duration::from_millis(self.cache.memory_ttl_ceiling_ms),
                },
            },
            strategy: StrategyConfig::default(),
        }
    }
}
