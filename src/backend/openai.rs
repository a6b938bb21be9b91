//! Chat-completions backend for Mistral and other OpenAI-compatible providers.
//!
//! Requests go to `{base_url}/v1/chat/completions` as a single non-streamed
//! exchange: an optional system message followed by the user prompt.

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

impl<'a> ChatBody<'a> {
    fn from_request(request: &'a LlmRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });
        Self {
            model: &request.model,
            messages,
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletion {
    fn into_text(self) -> Option<(String, Option<Value>)> {
        let metadata = self.metadata();
        let text = self.choices.into_iter().next()?.message.content?;
        Some((text, metadata))
    }

    fn metadata(&self) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        if let Some(ref id) = self.id {
            meta.insert("id".into(), Value::from(id.as_str()));
        }
        if let Some(ref model) = self.model {
            meta.insert("model".into(), Value::from(model.as_str()));
        }
        if let Some(ref usage) = self.usage {
            meta.insert("usage".into(), usage.clone());
        }
        (!meta.is_empty()).then_some(Value::Object(meta))
    }
}

/// Backend speaking the chat-completions protocol.
///
/// # Example
///
/// ```
/// use strategy_pipeline::backend::OpenAiBackend;
///
/// let anonymous = OpenAiBackend::new();
/// let mistral = OpenAiBackend::new().with_api_key("sk-...");
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    /// Sent as `Authorization: Bearer {key}` when set.
    pub(crate) api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = self.api_key.as_deref().map(|k| match k.get(..6) {
            Some(prefix) if k.len() > 6 => format!("{}***", prefix),
            _ => "***".to_string(),
        });
        f.debug_struct("OpenAiBackend").field("api_key", &key).finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn post(&self, client: &Client, base_url: &str, body: &ChatBody<'_>) -> reqwest::RequestBuilder {
        let url = format!("{}{}", base_url.trim_end_matches('/'), COMPLETIONS_PATH);
        let req = client.post(url).json(body);
        match self.api_key {
            Some(ref key) => req.header(AUTHORIZATION, format!("Bearer {}", key)),
            None => req,
        }
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull the human-readable message out of a provider error body.
///
/// Mistral answers `{"message": ..}`, OpenAI `{"error": {"message": ..}}`.
/// Anything else is returned as-is.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(&self, client: &Client, base_url: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let body = ChatBody::from_request(request);
        let resp = self.post(client, base_url, &body).send().await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = retry_after(resp.headers());
            let raw = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status,
                body: error_message(&raw),
                retry_after,
            });
        }

        let completion: ChatCompletion = resp.json().await?;
        let (text, metadata) = completion
            .into_text()
            .ok_or_else(|| PipelineError::Backend("completion carried no message content".into()))?;

        Ok(LlmResponse { text, status, metadata })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
