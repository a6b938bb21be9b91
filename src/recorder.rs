//! Persistence collaborator contract.
//!
//! The orchestrator hands every stage result, the run completion and a few
//! log events to a [`RunRecorder`]. Storage is entirely the implementor's
//! business. Calls are bounded by a timeout and their failures are logged,
//! never propagated: a run completes the same with a dead recorder.

use crate::error::Result;
use crate::record::StructuredRecord;
use crate::types::{ErrorDetail, RunStatus, StageResult, StageStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// One stage outcome, as handed to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub run_id: Uuid,
    pub stage: String,
    pub status: StageStatus,
    pub raw_text: Option<String>,
    pub record: Option<StructuredRecord>,
    /// Markdown rendering of `record`.
    pub formatted: Option<String>,
    pub error: Option<ErrorDetail>,
    pub elapsed_ms: u64,
}

impl StageRecord {
    pub fn from_result(run_id: Uuid, result: &StageResult) -> Self {
        Self {
            run_id,
            stage: result.stage.clone(),
            status: result.status,
            raw_text: result.raw_text.clone(),
            record: result.record.clone(),
            formatted: result.record.as_ref().map(StructuredRecord::to_markdown),
            error: result.error.clone(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A system log entry destined for the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    /// Emitting component, e.g. `"pipeline"`.
    pub component: String,
    pub message: String,
    pub run_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
}

impl LogEvent {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            component: component.into(),
            message: message.into(),
            run_id: None,
            details: None,
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Sink for run results and log events.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Called once per finished stage, success or failure.
    async fn record_stage_result(&self, record: &StageRecord) -> Result<()>;

    /// Called once when a run ends.
    async fn record_run_completion(&self, run_id: Uuid, status: RunStatus, elapsed: Duration) -> Result<()>;

    async fn log_event(&self, event: &LogEvent) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

#[async_trait]
impl RunRecorder for NoopRecorder {
    async fn record_stage_result(&self, _record: &StageRecord) -> Result<()> {
        Ok(())
    }

    async fn record_run_completion(&self, _run_id: Uuid, _status: RunStatus, _elapsed: Duration) -> Result<()> {
        Ok(())
    }

    async fn log_event(&self, _event: &LogEvent) -> Result<()> {
        Ok(())
    }
}

/// A run completion as seen by [`MemoryRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub elapsed: Duration,
}

/// Keeps everything in memory. Handy in tests and demos.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    stages: Mutex<Vec<StageRecord>>,
    completions: Mutex<Vec<Completion>>,
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_records(&self) -> Vec<StageRecord> {
        lock(&self.stages).clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        lock(&self.completions).clone()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        lock(&self.events).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RunRecorder for MemoryRecorder {
    async fn record_stage_result(&self, record: &StageRecord) -> Result<()> {
        lock(&self.stages).push(record.clone());
        Ok(())
    }

    async fn record_run_completion(&self, run_id: Uuid, status: RunStatus, elapsed: Duration) -> Result<()> {
        lock(&self.completions).push(Completion {
            run_id,
            status,
            elapsed,
        });
        Ok(())
    }

    async fn log_event(&self, event: &LogEvent) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Await a recorder call for at most `limit`. Failures are logged and swallowed.
pub(crate) async fn bounded<F>(limit: Duration, what: &'static str, call: F)
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(call = what, error = %err, "recorder call failed"),
        Err(_) => tracing::warn!(
            call = what,
            timeout_ms = limit.as_millis() as u64,
            "recorder call timed out"
        ),
    }
}
