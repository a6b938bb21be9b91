//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait is the text-generation client contract: given a
//! system instruction and a user prompt, return generated text or fail.
//! Built-in implementations: [`OpenAiBackend`] (any OpenAI-compatible chat
//! completions endpoint, Mistral included) and [`MockBackend`] for tests.
//!
//! ```text
//! Invoker ──► LlmRequest ──► Backend::complete() ──► LlmResponse
//!                                    │
//!                         ┌──────────┴──────────┐
//!                    OpenAiBackend          MockBackend
//!                 /v1/chat/completions    scripted replies
//! ```
//!
//! Backends do not retry. Pacing, timeouts and retries live in the
//! [`invoker`](crate::invoker).

pub mod mock;
pub mod openai;

pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;

use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Sampling configuration for LLM requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }
}

/// A normalized LLM request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"mistral-large-latest"`).
    pub model: String,

    /// System instruction. Empty instructions are not sent.
    pub system_prompt: String,

    /// The user prompt text.
    pub prompt: String,

    pub config: LlmConfig,
}

/// A normalized LLM response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, model info).
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over text-generation providers.
///
/// Implementors translate between the normalized [`LlmRequest`]/[`LlmResponse`]
/// and the provider's HTTP API. Failures should surface as
/// [`PipelineError::HttpError`](crate::PipelineError::HttpError) when the
/// provider answered with a status code, so the invoker can tell a
/// rate-limit apart from other failures.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one non-streaming completion.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 2048);
    }

    #[test]
    fn test_llm_config_builders() {
        let config = LlmConfig::default()
            .with_temperature(0.2)
            .with_max_tokens(512);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.max_tokens, 512);
    }
}
