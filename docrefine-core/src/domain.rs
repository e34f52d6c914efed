use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Options passed through to the completion API for a single document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Reshaping instruction applied to the document (summarize, rewrite, ...).
    pub instruction: String,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 4096,
            instruction: String::new(),
        }
    }
}

/// A single outbound request to the hosted completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub content: String,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        content: impl Into<String>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
            options,
        }
    }

    /// Stable fingerprint of content + model + options, used as a cache key.
    ///
    /// The cache layer treats keys as opaque strings; this is the only place
    /// where key derivation semantics live.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.options.instruction.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.options.temperature.to_bits().to_le_bytes());
        hasher.update(self.options.max_output_tokens.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Rough token estimate used for admission checks before the provider
    /// reports actual usage.
    pub fn estimated_tokens(&self) -> u64 {
        (self.content.len() as u64 / 4).max(1) + self.options.max_output_tokens as u64
    }
}

/// Token accounting reported by the completion API.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Reshaped document returned by the completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: Uuid,
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
}

impl CompletionResponse {
    pub fn new(model: impl Into<String>, content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            content: content.into(),
            usage,
            created_at: Utc::now(),
        }
    }
}
