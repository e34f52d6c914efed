//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber`: an env-filterable registry with
//! a JSON, pretty, or compact fmt layer. Call [`init_logging`] once at
//! startup; library code only emits `tracing` events and never installs a
//! subscriber itself.

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Explicit filter directive overriding `level`
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "docrefine_gateway=info".to_string(),
            filter: None,
            format: LogFormat::Compact,
        }
    }
}

/// Initialize the global subscriber. Returns an error if a subscriber is
/// already installed or the filter directive does not parse.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = if let Some(filter) = &config.filter {
        EnvFilter::try_new(filter)?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer().compact().with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()?;
        }
    }

    info!(format = ?config.format, "logging initialized");
    Ok(())
}
