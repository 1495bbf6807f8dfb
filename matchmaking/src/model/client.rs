//! Model client contract.
//!
//! The engine never talks to a provider directly. Every structured call names
//! a versioned prompt, carries the rendered text plus the bound variables, and
//! returns raw content with token usage, or a classified error.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Variables bound into a prompt template.
pub type PromptVariables = BTreeMap<String, serde_json::Value>;

/// Provider-side settings for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model name as understood by the provider.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1200,
        }
    }
}

/// One structured model call.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    /// Template name, e.g. `debate.advocate`.
    pub prompt_name: String,
    pub prompt_version: u32,
    pub variables: PromptVariables,
    /// System text of the rendered template.
    pub system: String,
    /// Rendered user text.
    pub rendered: String,
    pub settings: ModelSettings,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Raw model output prior to role-specific parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually served the call.
    pub model: String,
}

/// Classified model-call failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    // ── Retryable ─────────────────────────────────────────────────────────
    /// No response within the per-call budget.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// Provider asked us to slow down.
    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    /// Network failure or 5xx from the provider.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Output did not match the role schema.
    #[error("unparseable model output: {0}")]
    Parse(String),

    // ── Fatal ─────────────────────────────────────────────────────────────
    /// Prompt could not be rendered (unknown template, missing variable).
    #[error("prompt binding failed: {0}")]
    Prompt(String),

    /// Authentication or malformed-request failure.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl ModelError {
    /// Whether the call site may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Transient(_) | Self::Parse(_)
        )
    }

    /// Short machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Parse(_) => "parse",
            Self::Prompt(_) => "prompt",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// A language model capable of one structured call.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Evaluate a rendered prompt.
    async fn evaluate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Human-readable client name for logs.
    fn name(&self) -> &str {
        "model"
    }
}
