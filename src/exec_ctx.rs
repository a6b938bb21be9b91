//! Execution context shared across pipeline runs.
//!
//! [`ExecCtx`] carries the HTTP client, LLM backend, endpoint, model
//! settings, the pacing gate, the retry policy, the persistence recorder and
//! an optional event handler. It is designed to be constructed once per
//! process and shared by every run, so the pacing gate really is global.

use crate::backend::{Backend, LlmConfig, OpenAiBackend};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::events::EventHandler;
use crate::rate_limit::RateLimiter;
use crate::recorder::{NoopRecorder, RunRecorder};
use crate::retry::RetryPolicy;
use crate::PipelineError;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Shared execution context for pipeline runs.
///
/// # Example
///
/// ```
/// use strategy_pipeline::ExecCtx;
/// use std::time::Duration;
///
/// let ctx = ExecCtx::builder("https://api.mistral.ai")
///     .api_key("sk-...")
///     .model("mistral-large-latest")
///     .attempt_timeout(Duration::from_secs(60))
///     .build()
///     .unwrap();
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally).
    pub client: Client,
    /// Base URL for the LLM provider (e.g. `https://api.mistral.ai`).
    pub base_url: String,
    /// LLM backend. Default: [`OpenAiBackend`].
    pub backend: Arc<dyn Backend>,
    /// Default model for stages that do not override it.
    pub model: String,
    /// Default sampling settings for stages that do not override them.
    pub llm_config: LlmConfig,
    /// Pacing gate. Share one `Arc` between contexts that hit the same provider.
    pub rate_limiter: Arc<RateLimiter>,
    /// Attempt cap and backoff.
    pub retry: RetryPolicy,
    /// Deadline for a single backend attempt.
    pub attempt_timeout: Duration,
    /// Persistence collaborator. Default: [`NoopRecorder`].
    pub recorder: Arc<dyn RunRecorder>,
    /// Deadline for a single recorder call.
    pub recorder_timeout: Duration,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            api_key: None,
            model: None,
            llm_config: None,
            rate_limiter: None,
            retry: None,
            attempt_timeout: None,
            recorder: None,
            recorder_timeout: None,
            event_handler: None,
        }
    }

    /// Build a context from loaded configuration, with the OpenAI-compatible backend.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder(&config.base_url)
            .model(&config.model)
            .llm_config(
                LlmConfig::default()
                    .with_temperature(config.temperature)
                    .with_max_tokens(config.max_tokens),
            )
            .rate_limiter(Arc::new(config.rate_limiter()))
            .retry(config.retry_policy())
            .attempt_timeout(config.attempt_timeout())
            .recorder_timeout(config.recorder_timeout());
        if let Some(ref key) = config.api_key {
            builder = builder.api_key(key);
        }
        builder.build()
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("llm_config", &self.llm_config)
            .field("rate_limiter", &self.rate_limiter)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("recorder_timeout", &self.recorder_timeout)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    api_key: Option<String>,
    model: Option<String>,
    llm_config: Option<LlmConfig>,
    rate_limiter: Option<Arc<RateLimiter>>,
    retry: Option<RetryPolicy>,
    attempt_timeout: Option<Duration>,
    recorder: Option<Arc<dyn RunRecorder>>,
    recorder_timeout: Option<Duration>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the LLM backend. Default: [`OpenAiBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// API key for the default [`OpenAiBackend`]. Ignored when a custom
    /// backend is set.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Default model. Default: `mistral-large-latest`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn llm_config(mut self, config: LlmConfig) -> Self {
        self.llm_config = Some(config);
        self
    }

    /// Set the pacing gate. Default: [`RateLimiter::default()`].
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Set the retry policy. Default: [`RetryPolicy::default()`].
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Deadline for one backend attempt. Default: 60 seconds.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Set the persistence recorder. Default: [`NoopRecorder`].
    pub fn recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Deadline for one recorder call. Default: 5 seconds.
    pub fn recorder_timeout(mut self, timeout: Duration) -> Self {
        self.recorder_timeout = Some(timeout);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> Result<ExecCtx> {
        let attempt_timeout = self.attempt_timeout.unwrap_or(Duration::from_secs(60));
        if attempt_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "attempt timeout must be greater than zero".into(),
            ));
        }
        let client = match self.client {
            Some(client) => client,
            // The invoker enforces the per-attempt deadline; this is a backstop.
            None => Client::builder().timeout(attempt_timeout * 2).build()?,
        };
        let backend = self.backend.unwrap_or_else(|| {
            let backend = match self.api_key {
                Some(key) => OpenAiBackend::new().with_api_key(key),
                None => OpenAiBackend::new(),
            };
            Arc::new(backend)
        });
        Ok(ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend,
            model: self
                .model
                .unwrap_or_else(|| "mistral-large-latest".to_string()),
            llm_config: self.llm_config.unwrap_or_default(),
            rate_limiter: self
                .rate_limiter
                .unwrap_or_else(|| Arc::new(RateLimiter::default())),
            retry: self.retry.unwrap_or_default(),
            attempt_timeout,
            recorder: self.recorder.unwrap_or_else(|| Arc::new(NoopRecorder)),
            recorder_timeout: self.recorder_timeout.unwrap_or(Duration::from_secs(5)),
            event_handler: self.event_handler,
        })
    }
}

/// Strip known provider path suffixes from a base URL so the backend can
/// append its own path.
/// e.g., "https://api.mistral.ai/v1" -> "https://api.mistral.ai"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // Longest first.
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_normalize_base_url_strips_v1() {
        assert_eq!(normalize_base_url("https://api.mistral.ai/v1"), "https://api.mistral.ai");
        assert_eq!(normalize_base_url("https://api.mistral.ai/v1/"), "https://api.mistral.ai");
    }

    #[test]
    fn test_normalize_base_url_strips_full_path() {
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com"
        );
    }

    #[test]
    fn test_normalize_base_url_preserves_clean() {
        assert_eq!(normalize_base_url("http://localhost:8000"), "http://localhost:8000");
    }

    #[test]
    fn test_defaults() {
        let ctx = ExecCtx::builder("https://api.mistral.ai").build().unwrap();
        assert_eq!(ctx.backend.name(), "openai");
        assert_eq!(ctx.model, "mistral-large-latest");
        assert_eq!(ctx.attempt_timeout, Duration::from_secs(60));
        assert_eq!(ctx.recorder_timeout, Duration::from_secs(5));
        assert_eq!(ctx.retry.max_attempts, 3);
        assert_eq!(ctx.rate_limiter.min_spacing(), Duration::from_secs(2));
    }

    #[test]
    fn test_custom_backend_wins() {
        let ctx = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("x")))
            .api_key("ignored")
            .build()
            .unwrap();
        assert_eq!(ctx.backend.name(), "mock");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ExecCtx::builder("http://unused")
            .attempt_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_config() {
        let config = PipelineConfig {
            model: "mistral-small-latest".into(),
            min_spacing_ms: 500,
            max_attempts: 4,
            ..PipelineConfig::default()
        };
        let ctx = ExecCtx::from_config(&config).unwrap();
        assert_eq!(ctx.model, "mistral-small-latest");
        assert_eq!(ctx.retry.max_attempts, 4);
        assert_eq!(ctx.rate_limiter.min_spacing(), Duration::from_millis(500));
    }

    #[test]
    fn test_debug_lists_backend_name() {
        let ctx = ExecCtx::builder("http://unused").build().unwrap();
        let out = format!("{:?}", ctx);
        assert!(out.contains("openai"));
        assert!(out.contains("mistral-large-latest"));
    }
}
