//! Resilient invocation of the text-generation backend.
//!
//! [`invoke`] wraps one [`Backend::complete`](crate::backend::Backend::complete)
//! call with the pacing gate, a per-attempt deadline, failure classification
//! and bounded exponential backoff. Retryable failures never escape this
//! module: the caller sees either the generated text or a terminal
//! [`StageFailure`] classified like the last failed attempt.

use crate::backend::LlmRequest;
use crate::error::{InvocationError, StageFailure};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::retry::{RetryState, Transition};
use std::time::Duration;
use tokio::time::Instant;

/// A successful invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Generated text.
    pub text: String,
    /// Attempts used, the successful one included.
    pub attempts: u32,
    /// Wall time from the first pacing wait to the answer.
    pub elapsed: Duration,
}

/// Call the backend for `stage`, retrying per the context's policy.
pub async fn invoke(
    ctx: &ExecCtx,
    stage: &str,
    request: &LlmRequest,
) -> Result<Invocation, StageFailure> {
    let started = Instant::now();
    let mut state = RetryState::new();

    loop {
        let attempt = state.begin_attempt();
        ctx.rate_limiter.acquire().await;

        tracing::trace!(attempt, prompt_chars = request.prompt.len(), "dispatching");
        let outcome = tokio::time::timeout(
            ctx.attempt_timeout,
            ctx.backend.complete(&ctx.client, &ctx.base_url, request),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(response)) => {
                return Ok(Invocation {
                    text: response.text,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                });
            }
            Ok(Err(err)) => InvocationError::classify(&err),
            Err(_) => InvocationError::timeout(ctx.attempt_timeout),
        };

        match state.on_failure(failure.clone(), &ctx.retry) {
            Transition::Retry { attempt: next, delay } => {
                tracing::warn!(
                    kind = %failure.kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.message,
                    "backend attempt failed, retrying"
                );
                emit(
                    &ctx.event_handler,
                    Event::InvocationRetry {
                        stage: stage.to_string(),
                        attempt: next,
                        kind: failure.kind,
                        delay_ms: delay.as_millis() as u64,
                        reason: failure.message.clone(),
                    },
                );
                tokio::time::sleep(delay).await;
            }
            Transition::Exhausted => {
                let failure = state.into_failure(stage);
                tracing::error!(
                    kind = %failure.kind,
                    attempts = failure.attempts,
                    error = %failure.message,
                    "backend attempts exhausted"
                );
                return Err(failure);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmConfig, MockBackend, MockReply};
    use crate::error::FailureKind;
    use crate::events::FnEventHandler;
    use crate::rate_limit::RateLimiter;
    use crate::retry::RetryPolicy;
    use std::sync::{Arc, Mutex};

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            system_prompt: "system".into(),
            prompt: "prompt".into(),
            config: LlmConfig::default(),
        }
    }

    fn ctx(mock: Arc<MockBackend>) -> ExecCtx {
        ExecCtx::builder("http://unused")
            .backend(mock)
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .attempt_timeout(Duration::from_secs(10))
            .build()
            .expect("ctx")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success() {
        let mock = Arc::new(MockBackend::fixed("hello"));
        let got = invoke(&ctx(mock.clone()), "s", &request()).await.unwrap();
        assert_eq!(got.text, "hello");
        assert_eq!(got.attempts, 1);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::Status(503, "unavailable".into()),
            MockReply::rate_limited(),
            MockReply::text("finally"),
        ]));
        let got = invoke(&ctx(mock.clone()), "s", &request()).await.unwrap();
        assert_eq!(got.text, "finally");
        assert_eq!(got.attempts, 3);
        // 2s after the first failure, at least 4s after the second.
        assert!(got.elapsed >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_attempt_cap() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::fail("boom")]));
        let failure = invoke(&ctx(mock.clone()), "synthesis", &request())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.kind, FailureKind::Generic);
        assert_eq!(failure.stage, "synthesis");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_cap_respected() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::fail("boom")]));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .retry(RetryPolicy::default().with_max_attempts(5))
            .build()
            .unwrap();
        let failure = invoke(&ctx, "s", &request()).await.unwrap_err();
        assert_eq!(failure.attempts, 5);
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_is_classified_as_timeout() {
        let mock = Arc::new(MockBackend::new(vec![MockReply::Hang]));
        let failure = invoke(&ctx(mock.clone()), "s", &request()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_kind_follows_last_failure() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::Hang,
            MockReply::fail("boom"),
            MockReply::rate_limited(),
        ]));
        let failure = invoke(&ctx(mock), "s", &request()).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_dispatches_respect_min_spacing() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::fail("a"),
            MockReply::text("ok"),
        ]));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock.clone())
            .rate_limiter(Arc::new(RateLimiter::new(
                Duration::from_secs(2),
                Duration::from_millis(100),
            )))
            .retry(RetryPolicy::default().with_base_delay(Duration::from_millis(10)))
            .build()
            .unwrap();

        invoke(&ctx, "a", &request()).await.unwrap();
        invoke(&ctx, "b", &request()).await.unwrap();
        invoke(&ctx, "c", &request()).await.unwrap();

        let times: Vec<_> = mock.dispatches().into_iter().map(|d| d.at).collect();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_events_emitted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::rate_limited(),
            MockReply::text("ok"),
        ]));
        let ctx = ExecCtx::builder("http://unused")
            .backend(mock)
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .event_handler(Arc::new(FnEventHandler(move |event: Event| {
                if let Event::InvocationRetry { attempt, kind, .. } = event {
                    sink.lock().unwrap().push((attempt, kind));
                }
            })))
            .build()
            .unwrap();

        invoke(&ctx, "s", &request()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(2, FailureKind::RateLimited)]);
    }
}
