use crate::error::{FailureKind, PipelineFailure, StageFailure};
use crate::record::{ParseTier, StructuredRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Input to a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineInput {
    /// The subject under analysis (a strategic question, a topic).
    pub subject: String,

    /// Named parameters available to prompt templates as `{name}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl PipelineInput {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Error => "error",
        }
    }
}

/// Why a stage ended in [`StageStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Output from a single stage. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Identity of the stage that produced this result.
    pub stage: String,

    pub status: StageStatus,

    /// The parsed payload. Present exactly when `status` is `Success`.
    pub record: Option<StructuredRecord>,

    /// Raw backend text the record was parsed from.
    pub raw_text: Option<String>,

    pub error: Option<ErrorDetail>,

    /// Wall time spent in the stage, pacing and retries included.
    pub elapsed_ms: u64,

    /// Backend attempts made (1 on a first-try success).
    pub attempts: u32,
}

impl StageResult {
    pub fn success(
        stage: impl Into<String>,
        record: StructuredRecord,
        raw_text: impl Into<String>,
        elapsed_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Success,
            record: Some(record),
            raw_text: Some(raw_text.into()),
            error: None,
            elapsed_ms,
            attempts,
        }
    }

    pub fn failure(failure: &StageFailure, elapsed_ms: u64) -> Self {
        Self {
            stage: failure.stage.clone(),
            status: StageStatus::Error,
            record: None,
            raw_text: None,
            error: Some(ErrorDetail {
                kind: failure.kind,
                message: failure.message.clone(),
            }),
            elapsed_ms,
            attempts: failure.attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Parsing tier that produced the record, if any.
    pub fn tier(&self) -> Option<ParseTier> {
        self.record.as_ref().map(|r| r.tier)
    }
}

/// Successful stage results of one run, keyed by stage identity.
///
/// Append-only: an identity is written at most once per run and never
/// overwritten. Only the orchestrator writes to it; prompt formatters see it
/// through a [`ContextView`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    results: BTreeMap<String, StageResult>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a successful result under its stage identity.
    ///
    /// Returns `false` without modifying the context if the identity is
    /// already present or the result is not a success.
    pub fn insert(&mut self, result: StageResult) -> bool {
        if !result.is_success() || self.results.contains_key(&result.stage) {
            return false;
        }
        self.results.insert(result.stage.clone(), result);
        true
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.get(stage)
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.results.contains_key(stage)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(|k| k.as_str())
    }

    /// A read-only view restricted to `allowed` stage identities.
    pub fn view<'a>(&'a self, allowed: &'a [String]) -> ContextView<'a> {
        ContextView {
            context: self,
            allowed,
        }
    }
}

/// Read-only window onto a [`PipelineContext`] exposing only a stage's
/// declared dependencies.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    context: &'a PipelineContext,
    allowed: &'a [String],
}

impl<'a> ContextView<'a> {
    /// Result of a dependency. `None` for undeclared stages.
    pub fn get(&self, stage: &str) -> Option<&'a StageResult> {
        if self.allowed.iter().any(|s| s == stage) {
            self.context.get(stage)
        } else {
            None
        }
    }

    /// Parsed record of a dependency.
    pub fn record(&self, stage: &str) -> Option<&'a StructuredRecord> {
        self.get(stage).and_then(|r| r.record.as_ref())
    }

    /// Declared dependency identities, in declaration order.
    pub fn dependencies(&self) -> &'a [String] {
        self.allowed
    }
}

/// Every result a run produced, in stage declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageResults(Vec<StageResult>);

impl StageResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_ordered(results: Vec<StageResult>) -> Self {
        Self(results)
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.0.iter().find(|r| r.stage == stage)
    }

    pub fn record(&self, stage: &str) -> Option<&StructuredRecord> {
        self.get(stage).and_then(|r| r.record.as_ref())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageResult> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stage identities in order.
    pub fn stages(&self) -> Vec<&str> {
        self.0.iter().map(|r| r.stage.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<StageResult> {
        self.0
    }
}

impl<'a> IntoIterator for &'a StageResults {
    type Item = &'a StageResult;
    type IntoIter = std::slice::Iter<'a, StageResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A run that completed every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Every stage result, in declaration order.
    pub results: StageResults,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn record(&self, stage: &str) -> Option<&StructuredRecord> {
        self.results.record(stage)
    }
}

/// Terminal state of a run, as reported to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// What [`Pipeline::run`](crate::pipeline::Pipeline::run) returns.
pub type FinalResult = std::result::Result<RunReport, PipelineFailure>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Item, Section};

    fn ok(stage: &str) -> StageResult {
        let record = StructuredRecord::new(ParseTier::Strict)
            .with_section(Section::new("Findings").with_item(Item::new(stage)));
        StageResult::success(stage, record, "raw", 5, 1)
    }

    #[test]
    fn test_context_is_append_only() {
        let mut ctx = PipelineContext::new();
        assert!(ctx.insert(ok("a")));

        let mut replacement = ok("a");
        replacement.elapsed_ms = 999;
        assert!(!ctx.insert(replacement));
        assert_eq!(ctx.get("a").map(|r| r.elapsed_ms), Some(5));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_context_rejects_failures() {
        let failure = StageFailure {
            stage: "b".into(),
            kind: FailureKind::Timeout,
            attempts: 3,
            message: "slow".into(),
        };
        let mut ctx = PipelineContext::new();
        assert!(!ctx.insert(StageResult::failure(&failure, 10)));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_view_hides_undeclared_stages() {
        let mut ctx = PipelineContext::new();
        ctx.insert(ok("a"));
        ctx.insert(ok("b"));

        let deps = vec!["a".to_string()];
        let view = ctx.view(&deps);
        assert!(view.get("a").is_some());
        assert!(view.record("a").is_some());
        assert!(view.get("b").is_none());
        assert_eq!(view.dependencies(), &["a".to_string()]);
    }

    #[test]
    fn test_failure_result_carries_error_detail() {
        let failure = StageFailure {
            stage: "c".into(),
            kind: FailureKind::RateLimited,
            attempts: 3,
            message: "HTTP 429".into(),
        };
        let result = StageResult::failure(&failure, 42);
        assert_eq!(result.status, StageStatus::Error);
        assert!(result.record.is_none());
        assert_eq!(result.attempts, 3);
        let detail = result.error.expect("error detail");
        assert_eq!(detail.kind, FailureKind::RateLimited);
    }

    #[test]
    fn test_stage_results_lookup() {
        let results = StageResults::from_ordered(vec![ok("a"), ok("b")]);
        assert_eq!(results.stages(), vec!["a", "b"]);
        assert!(results.record("b").is_some());
        assert!(results.get("z").is_none());
    }

    #[test]
    fn test_input_params() {
        let input = PipelineInput::new("EV adoption").with_param("region", "EU");
        assert_eq!(input.param("region"), Some("EU"));
        assert_eq!(input.param("scope"), None);
    }
}
