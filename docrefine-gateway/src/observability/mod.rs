//! Health checking and logging setup.

pub mod health;
pub mod logging;

pub use health::{HealthChecker, HealthProbe, HealthReport, ProbeResult};
pub use logging::{init_logging, LogConfig, LogFormat};
