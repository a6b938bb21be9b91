//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] plays back scripted [`MockReply`]s, optionally routed by a
//! marker string found in the request's system instruction, so one backend
//! can answer every stage of a pipeline differently. It records when each
//! call was dispatched, which is what pacing tests assert against.
//!
//! # Example
//!
//! ```
//! use strategy_pipeline::backend::{MockBackend, MockReply};
//! use std::time::Duration;
//!
//! let mock = MockBackend::fixed("## Findings\n1. Demand is rising")
//!     .route("[stage:risk]", vec![MockReply::rate_limited(), MockReply::text("## Risks\n- Supply")])
//!     .route_latency("[stage:risk]", Duration::from_millis(300));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;

/// One scripted backend behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with this text.
    Text(String),
    /// Fail with HTTP 429 and an optional `Retry-After`.
    RateLimited(Option<Duration>),
    /// Fail with an arbitrary HTTP status and body.
    Status(u16, String),
    /// Fail with a non-HTTP backend error carrying this message.
    Fail(String),
    /// Never answer. Only a caller-side timeout ends the call.
    Hang,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    pub fn rate_limited() -> Self {
        MockReply::RateLimited(None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail(message.into())
    }
}

/// Replies are consumed in order; the last one repeats once the script runs out.
#[derive(Debug)]
struct Script {
    replies: Vec<MockReply>,
    cursor: AtomicUsize,
    latency: Duration,
}

impl Script {
    fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            cursor: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    fn next_reply(&self) -> Option<MockReply> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.replies
            .get(idx)
            .or_else(|| self.replies.last())
            .cloned()
    }
}

#[derive(Debug)]
struct Route {
    marker: String,
    script: Script,
}

/// A single observed call.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// When the call reached the backend (tokio clock, so paused-time aware).
    pub at: Instant,
    /// Marker of the route that answered, or `None` for the default script.
    pub route: Option<String>,
}

/// A test backend that plays back scripted replies.
#[derive(Debug)]
pub struct MockBackend {
    default: Script,
    routes: Vec<Route>,
    calls: AtomicUsize,
    dispatches: Mutex<Vec<Dispatch>>,
}

impl MockBackend {
    /// Create a mock backend whose default script is `replies`.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            default: Script::new(replies),
            routes: Vec::new(),
            calls: AtomicUsize::new(0),
            dispatches: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(response.into())])
    }

    /// Answer requests whose system instruction contains `marker` from `replies`.
    ///
    /// Routes are checked in registration order; the first match wins.
    pub fn route(mut self, marker: impl Into<String>, replies: Vec<MockReply>) -> Self {
        self.routes.push(Route {
            marker: marker.into(),
            script: Script::new(replies),
        });
        self
    }

    /// Delay every reply on the route registered for `marker`.
    pub fn route_latency(mut self, marker: &str, latency: Duration) -> Self {
        if let Some(route) = self.routes.iter_mut().find(|r| r.marker == marker) {
            route.script.latency = latency;
        }
        self
    }

    /// Delay every reply of the default script.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.default.latency = latency;
        self
    }

    /// Total number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls answered by the route registered for `marker`.
    pub fn calls_for(&self, marker: &str) -> usize {
        self.dispatches()
            .iter()
            .filter(|d| d.route.as_deref() == Some(marker))
            .count()
    }

    /// Every call observed so far, in arrival order.
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn select(&self, request: &LlmRequest) -> (Option<&str>, &Script) {
        self.routes
            .iter()
            .find(|r| request.system_prompt.contains(&r.marker))
            .map(|r| (Some(r.marker.as_str()), &r.script))
            .unwrap_or((None, &self.default))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (route, script) = self.select(request);
        self.dispatches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Dispatch {
                at: Instant::now(),
                route: route.map(str::to_string),
            });

        let reply = script
            .next_reply()
            .ok_or_else(|| PipelineError::Backend("mock backend has no scripted reply".into()))?;

        if !script.latency.is_zero() {
            tokio::time::sleep(script.latency).await;
        }

        match reply {
            MockReply::Text(text) => Ok(LlmResponse {
                text,
                status: 200,
                metadata: None,
            }),
            MockReply::RateLimited(retry_after) => Err(PipelineError::HttpError {
                status: 429,
                body: "Too Many Requests".into(),
                retry_after,
            }),
            MockReply::Status(status, body) => Err(PipelineError::HttpError {
                status,
                body,
                retry_after: None,
            }),
            MockReply::Fail(message) => Err(PipelineError::Backend(message)),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                Err(PipelineError::Backend("mock hang resolved".into()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LlmConfig;

    fn request(system: &str) -> LlmRequest {
        LlmRequest {
            model: "test".to_string(),
            system_prompt: system.to_string(),
            prompt: "test".to_string(),
            config: LlmConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_mock_fixed_response() {
        let mock = MockBackend::fixed("Hello!");
        let client = Client::new();
        let resp = mock.complete(&client, "http://unused", &request("")).await.unwrap();
        assert_eq!(resp.text, "Hello!");
        assert_eq!(resp.status, 200);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_last_reply_repeats() {
        let mock = MockBackend::new(vec![MockReply::fail("boom"), MockReply::text("ok")]);
        let client = Client::new();
        let r1 = mock.complete(&client, "http://unused", &request("")).await;
        let r2 = mock.complete(&client, "http://unused", &request("")).await.unwrap();
        let r3 = mock.complete(&client, "http://unused", &request("")).await.unwrap();
        assert!(matches!(r1, Err(PipelineError::Backend(ref m)) if m == "boom"));
        assert_eq!(r2.text, "ok");
        assert_eq!(r3.text, "ok");
    }

    #[tokio::test]
    async fn test_mock_routes_by_marker() {
        let mock = MockBackend::fixed("default").route("[a]", vec![MockReply::text("from a")]);
        let client = Client::new();
        let routed = mock.complete(&client, "", &request("You are [a].")).await.unwrap();
        let fallback = mock.complete(&client, "", &request("other")).await.unwrap();
        assert_eq!(routed.text, "from a");
        assert_eq!(fallback.text, "default");
        assert_eq!(mock.calls_for("[a]"), 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_rate_limited_reply() {
        let mock = MockBackend::new(vec![MockReply::RateLimited(Some(Duration::from_secs(2)))]);
        let err = mock
            .complete(&Client::new(), "", &request(""))
            .await
            .unwrap_err();
        match err {
            PipelineError::HttpError { status, retry_after, .. } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_route_latency() {
        let mock = MockBackend::fixed("x")
            .route("[slow]", vec![MockReply::text("y")])
            .route_latency("[slow]", Duration::from_secs(5));
        let start = Instant::now();
        mock.complete(&Client::new(), "", &request("[slow]")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mock_empty_script_is_an_error() {
        let mock = MockBackend::new(vec![]);
        assert!(mock.complete(&Client::new(), "", &request("")).await.is_err());
    }
}
