//! Loadable pipeline settings.
//!
//! [`PipelineConfig`] deserializes from JSON (or YAML with the `yaml`
//! feature) with every field defaulted, and can be read from `PIPELINE_*`
//! environment variables. [`ExecCtx::from_config`](crate::ExecCtx::from_config)
//! turns it into a runnable context.

use crate::error::Result;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment variable read by [`PipelineConfig::from_env`].
pub const ENV_PREFIX: &str = "PIPELINE_";

/// Runtime settings for the backend, pacing and retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_url: String,
    /// Sent as a bearer token when set.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub attempt_timeout_ms: u64,
    pub min_spacing_ms: u64,
    pub dispatch_jitter_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_jitter_ms: u64,
    pub recorder_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai".to_string(),
            api_key: None,
            model: "mistral-large-latest".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            attempt_timeout_ms: 60_000,
            min_spacing_ms: 2_000,
            dispatch_jitter_ms: 100,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            rate_limit_jitter_ms: 1_000,
            recorder_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `PIPELINE_*` variables; the API key comes from
    /// `LLM_API_KEY`, falling back to `MISTRAL_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(v) = var("BASE_URL") {
            config.base_url = v;
        }
        if let Some(v) = var("MODEL") {
            config.model = v;
        }
        config.api_key = lookup("LLM_API_KEY")
            .or_else(|| lookup("MISTRAL_API_KEY"))
            .filter(|k| !k.trim().is_empty());

        override_num(&var, "TEMPERATURE", &mut config.temperature)?;
        override_num(&var, "MAX_TOKENS", &mut config.max_tokens)?;
        override_num(&var, "ATTEMPT_TIMEOUT_MS", &mut config.attempt_timeout_ms)?;
        override_num(&var, "MIN_SPACING_MS", &mut config.min_spacing_ms)?;
        override_num(&var, "DISPATCH_JITTER_MS", &mut config.dispatch_jitter_ms)?;
        override_num(&var, "MAX_ATTEMPTS", &mut config.max_attempts)?;
        override_num(&var, "BASE_DELAY_MS", &mut config.base_delay_ms)?;
        override_num(&var, "MAX_DELAY_MS", &mut config.max_delay_ms)?;
        override_num(&var, "RATE_LIMIT_JITTER_MS", &mut config.rate_limit_jitter_ms)?;
        override_num(&var, "RECORDER_TIMEOUT_MS", &mut config.recorder_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::InvalidConfig(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url must not be empty"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(invalid("temperature must be a finite, non-negative number"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(invalid("attempt_timeout_ms must be greater than zero"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid("max_delay_ms must not be below base_delay_ms"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            rate_limit_jitter: Duration::from_millis(self.rate_limit_jitter_ms),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            Duration::from_millis(self.min_spacing_ms),
            Duration::from_millis(self.dispatch_jitter_ms),
        )
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn recorder_timeout(&self) -> Duration {
        Duration::from_millis(self.recorder_timeout_ms)
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::InvalidConfig(msg.to_string())
}

fn override_num<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<()> {
    if let Some(raw) = var(name) {
        *slot = raw.trim().parse().map_err(|_| {
            PipelineError::InvalidConfig(format!("{}{} is not a valid number: {:?}", ENV_PREFIX, name, raw))
        })?;
    }
    Ok(())
}
