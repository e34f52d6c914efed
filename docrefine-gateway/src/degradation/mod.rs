//! Error-strategy management and graceful degradation.

pub mod strategy;

pub use strategy::{
    DegradationOutcome, DegradedFailure, ErrorContext, ErrorStrategyManager, Fallback,
    RecoveryAction, RecoveryStrategy, Severity, StrategyConfig,
};
