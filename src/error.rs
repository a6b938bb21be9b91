use crate::types::StageResults;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the transport, configuration and collaborator layers.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Provider error message, or the raw body when it has none.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A single backend attempt exceeded its deadline.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered but the answer was unusable.
    #[error("backend error: {0}")]
    Backend(String),

    /// The persistence collaborator failed.
    #[error("recorder error: {0}")]
    Recorder(String),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// The three retryable failure classes of a backend invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The attempt did not finish before its deadline.
    Timeout,
    /// The backend signalled overload or an exhausted quota.
    RateLimited,
    /// Anything else.
    Generic,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Generic => "generic",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message fragments that mark a failure as rate-limit/quota related.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "quota exceeded",
    "too many requests",
];

/// One classified attempt failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct InvocationError {
    pub kind: FailureKind,
    pub message: String,
    /// Server-provided minimum wait before the next attempt.
    pub retry_after: Option<Duration>,
}

impl InvocationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no response within {} ms", after.as_millis()),
        )
    }

    /// Classify a backend error into one of the retryable classes.
    pub fn classify(error: &PipelineError) -> Self {
        let message = error.to_string();
        let kind = match error {
            PipelineError::Timeout(_) => FailureKind::Timeout,
            PipelineError::Request(e) if e.is_timeout() => FailureKind::Timeout,
            PipelineError::HttpError { status: 429, .. } => FailureKind::RateLimited,
            _ if is_rate_limit_message(&message) => FailureKind::RateLimited,
            _ => FailureKind::Generic,
        };
        let retry_after = match error {
            PipelineError::HttpError { retry_after, .. } => *retry_after,
            _ => None,
        };
        Self {
            kind,
            message,
            retry_after,
        }
    }
}

/// Whether a failure message carries a rate-limit or quota signal.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// A stage exhausted its attempts. Terminal for the stage.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("stage '{stage}' failed after {attempts} attempt(s) [{kind}]: {message}")]
pub struct StageFailure {
    pub stage: String,
    /// Class of the last observed failure.
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

/// A run aborted because one of its stages failed.
///
/// Carries every [`StageResult`](crate::types::StageResult) produced before
/// the abort, including the failing ones, for diagnostics.
#[derive(Error, Debug, Clone)]
#[error("pipeline run {run_id} aborted at stage '{stage}': {cause}")]
pub struct PipelineFailure {
    pub run_id: Uuid,
    /// Name of the stage that caused the abort.
    pub stage: String,
    pub cause: StageFailure,
    pub results: StageResults,
    pub elapsed_ms: u64,
}
