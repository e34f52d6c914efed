//! Resilience and flow-control layer for the DocRefine document service.
//!
//! Every outbound call to the hosted completion API passes through this
//! crate: sliding-window rate limits and calendar token budgets, a bulkhead
//! concurrency cap, a two-tier result cache, a retry executor gated by a
//! circuit breaker with adaptive per-call deadlines, and an
//! error-classification engine that turns terminal failures into typed
//! recovery strategies.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docrefine_core::{CompletionOptions, CompletionRequest};
//! use docrefine_gateway::config::GatewayConfig;
//! use docrefine_gateway::gateway::CompletionGateway;
//!
//! # async fn example(client: Arc<dyn docrefine_core::CompletionClient>) -> anyhow::Result<()> {
//! let gateway = CompletionGateway::new(client, GatewayConfig::default()).await;
//!
//! let request = CompletionRequest::new(
//!     "gpt-4o-mini",
//!     "Full document text...",
//!     CompletionOptions::default(),
//! );
//!
//! let outcome = gateway.process("user-42", &request).await?;
//! println!("reshaped in {} attempt(s)", outcome.attempts);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod cache;
pub mod config;
pub mod degradation;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod resilience;

pub use error::GatewayError;
pub use gateway::{CompletionGateway, CompletionOutcome};
