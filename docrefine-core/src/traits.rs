use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{CompletionRequest, CompletionResponse};
use crate::error::CompletionError;

/// Boundary to the hosted completion API.
///
/// Implementations own transport and payload concerns; the resilience layer
/// only ever sees the typed request/response/error shapes.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Shared key-value contract for the cache's second tier.
///
/// Keys are opaque strings, values are serialized by the caller. An external
/// store (or the in-process default) plugs in behind this trait.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);
}
