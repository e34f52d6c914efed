//! Aggregate health checking over registered probes.
//!
//! Probes are small closures or trait objects answering "is this component
//! healthy right now". Each run executes every probe, catching failures,
//! and retains only the latest result per probe. Overall health is the
//! conjunction of all probe results.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A single health probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns `Ok(())` when healthy, `Err(message)` when not.
    async fn check(&self) -> Result<(), String>;
}

/// Adapter turning a plain closure into a probe.
struct FnProbe<F>(F);

#[async_trait]
impl<F> HealthProbe for FnProbe<F>
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    async fn check(&self) -> Result<(), String> {
        (self.0)()
    }
}

/// Latest result for one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of one full run across all probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Conjunction of every probe's result
    pub healthy: bool,
    pub checks: HashMap<String, ProbeResult>,
    pub timestamp: DateTime<Utc>,
}

/// Runs registered probes and retains their latest results.
#[derive(Clone, Default)]
pub struct HealthChecker {
    probes: Arc<RwLock<Vec<(String, Arc<dyn HealthProbe>)>>>,
    latest: Arc<RwLock<HashMap<String, ProbeResult>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe under `name`, replacing any existing probe with the
    /// same name.
    pub async fn register(&self, name: impl Into<String>, probe: Arc<dyn HealthProbe>) {
        let name = name.into();
        let mut probes = self.probes.write().await;
        probes.retain(|(existing, _)| *existing != name);
        probes.push((name, probe));
    }

    /// Register a synchronous closure as a probe.
    pub async fn register_fn<F>(&self, name: impl Into<String>, probe: F)
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnProbe(probe))).await;
    }

    /// Run every probe concurrently and record fresh results.
    pub async fn run_checks(&self) -> HealthReport {
        let probes = self.probes.read().await.clone();
        let timestamp = Utc::now();
        let mut checks = HashMap::with_capacity(probes.len());
        let mut healthy = true;

        let outcomes = join_all(
            probes
                .into_iter()
                .map(|(name, probe)| async move { (name, probe.check().await) }),
        )
        .await;

        for (name, outcome) in outcomes {
            let result = match outcome {
                Ok(()) => ProbeResult {
                    healthy: true,
                    message: None,
                    checked_at: Utc::now(),
                },
                Err(message) => {
                    warn!(probe = %name, %message, "health probe failed");
                    ProbeResult {
                        healthy: false,
                        message: Some(message),
                        checked_at: Utc::now(),
                    }
                }
            };
            healthy &= result.healthy;
            checks.insert(name, result);
        }

        debug!(healthy, probes = checks.len(), "health run complete");
        *self.latest.write().await = checks.clone();

        HealthReport {
            healthy,
            checks,
            timestamp,
        }
    }

    /// Latest result for one probe, or overall health when `name` is `None`.
    /// Returns true when no run has happened yet.
    pub async fn is_healthy(&self, name: Option<&str>) -> bool {
        let latest = self.latest.read().await;
        match name {
            Some(name) => latest.get(name).map(|r| r.healthy).unwrap_or(true),
            None => latest.values().all(|r| r.healthy),
        }
    }
}
