//! Provider-opaque LLM port.
//!
//! The LLM is a remote oracle producing text; everything executable flows
//! through the sandbox instead. Implementations must retry transport
//! failures internally (rate-limit responses are transient) and surface the
//! typed errors below on exhaustion.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Rate limit still in force after internal retries.
    #[error("Rate limited")]
    RateLimited,

    /// Response carried no extractable code.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Network or HTTP failure after internal retries.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Timeout after {0} ms")]
    Timeout(u64),
}

impl LlmError {
    /// Transient errors may succeed if the whole generation is retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::TransportFailure(_) | Self::Timeout(_))
    }
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    /// 0.0 keeps the request deterministic.
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: 8192,
            temperature: 0.0,
            timeout_ms: 120_000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A code artifact recovered from a free-form response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub source_code: String,
    /// Prose preceding the code block, if any.
    pub rationale: String,
    pub raw_response: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt pair and return the raw response text.
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}
