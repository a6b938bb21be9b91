//! Pipeline orchestrator.
//!
//! Runs the execution groups computed by [`graph::execution_groups`] in
//! order. Members of a parallel group run concurrently against the same
//! context snapshot. Successful results are added to the context before the
//! next group starts; the first failing group aborts the run.

use crate::error::{PipelineFailure, Result, StageFailure};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::graph::{self, ExecutionGroup};
use crate::recorder::{bounded, LogEvent, LogLevel, StageRecord};
use crate::stage::{Stage, StageDefinition};
use crate::types::{
    FinalResult, PipelineContext, PipelineInput, RunReport, RunStatus, StageResult, StageResults,
};
use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

const COMPONENT: &str = "pipeline";

/// A validated stage graph, ready to run any number of times.
///
/// # Example
///
/// ```
/// use strategy_pipeline::{Pipeline, Stage};
///
/// let pipeline = Pipeline::builder()
///     .name("market-scan")
///     .stage(Stage::new("explore", "You are an analyst.", "Explore {subject}."))
///     .stage(
///         Stage::new("summarize", "You are an editor.", "Summarize:\n{explore}")
///             .depends_on(&["explore"]),
///     )
///     .build()
///     .unwrap();
/// assert_eq!(pipeline.stages().len(), 2);
/// ```
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
    groups: Vec<ExecutionGroup>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stages.iter().map(|s| s.id()).collect::<Vec<_>>())
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id() == id)
    }

    pub fn definitions(&self) -> Vec<&StageDefinition> {
        self.stages.iter().map(|s| &s.definition).collect()
    }

    /// Execution groups in run order.
    pub fn groups(&self) -> &[ExecutionGroup] {
        &self.groups
    }

    /// Stage identities per execution group, in run order.
    pub fn plan(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .map(|g| g.members.iter().map(|&m| self.stages[m].id()).collect())
            .collect()
    }

    /// Run every stage under a fresh run id.
    pub async fn run(&self, ctx: &ExecCtx, input: PipelineInput) -> FinalResult {
        self.run_with_id(ctx, Uuid::new_v4(), input).await
    }

    /// Run every stage under `run_id`.
    pub async fn run_with_id(&self, ctx: &ExecCtx, run_id: Uuid, input: PipelineInput) -> FinalResult {
        let span = tracing::info_span!("pipeline_run", run_id = %run_id, pipeline = %self.name);
        self.run_inner(ctx, run_id, input).instrument(span).await
    }

    async fn run_inner(&self, ctx: &ExecCtx, run_id: Uuid, input: PipelineInput) -> FinalResult {
        let started = Instant::now();
        tracing::info!(
            stages = self.stages.len(),
            groups = self.groups.len(),
            subject = %input.subject,
            "pipeline run started"
        );
        emit(
            &ctx.event_handler,
            Event::RunStart {
                run_id,
                stages: self.stages.len(),
            },
        );
        self.log(
            ctx,
            LogEvent::new(LogLevel::Info, COMPONENT, "run started")
                .with_run(run_id)
                .with_details(json!({
                    "pipeline": self.name,
                    "subject": input.subject,
                    "stages": self.stages.iter().map(|s| s.id()).collect::<Vec<_>>(),
                })),
        )
        .await;

        let mut context = PipelineContext::new();
        let mut slots: Vec<Option<StageResult>> = vec![None; self.stages.len()];

        for (index, group) in self.groups.iter().enumerate() {
            let ids: Vec<String> = group
                .members
                .iter()
                .map(|&m| self.stages[m].id().to_string())
                .collect();
            tracing::info!(group = index, stages = ?ids, parallel = group.is_parallel(), "dispatching group");
            emit(&ctx.event_handler, Event::GroupStart { index, stages: ids });

            let results = self.run_group(ctx, group, &input, &context).await;

            for result in &results {
                bounded(
                    ctx.recorder_timeout,
                    "record_stage_result",
                    ctx.recorder
                        .record_stage_result(&StageRecord::from_result(run_id, result)),
                )
                .await;
            }

            let failure = results.iter().find(|r| !r.is_success()).map(stage_failure);
            for (&member, result) in group.members.iter().zip(results) {
                slots[member] = Some(result);
            }

            if let Some(cause) = failure {
                return Err(self.abort(ctx, run_id, started, cause, slots).await);
            }

            for &member in &group.members {
                if let Some(result) = slots[member].clone() {
                    if !context.insert(result) {
                        tracing::warn!(stage = %self.stages[member].id(), "context already holds stage result, keeping the first");
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        tracing::info!(elapsed_ms, "pipeline run completed");
        self.log(
            ctx,
            LogEvent::new(LogLevel::Info, COMPONENT, "run completed")
                .with_run(run_id)
                .with_details(json!({ "elapsed_ms": elapsed_ms })),
        )
        .await;
        bounded(
            ctx.recorder_timeout,
            "record_run_completion",
            ctx.recorder
                .record_run_completion(run_id, RunStatus::Completed, elapsed),
        )
        .await;
        emit(
            &ctx.event_handler,
            Event::RunEnd {
                run_id,
                ok: true,
                elapsed_ms,
            },
        );

        Ok(RunReport {
            run_id,
            results: StageResults::from_ordered(slots.into_iter().flatten().collect()),
            elapsed_ms,
        })
    }

    /// Execute one group. Results come back in member (declaration) order
    /// regardless of completion order.
    async fn run_group(
        &self,
        ctx: &ExecCtx,
        group: &ExecutionGroup,
        input: &PipelineInput,
        context: &PipelineContext,
    ) -> Vec<StageResult> {
        if let [only] = group.members.as_slice() {
            return vec![self.stages[*only].execute(ctx, input, context).await];
        }
        join_all(
            group
                .members
                .iter()
                .map(|&m| self.stages[m].execute(ctx, input, context)),
        )
        .await
    }

    async fn abort(
        &self,
        ctx: &ExecCtx,
        run_id: Uuid,
        started: Instant,
        cause: StageFailure,
        slots: Vec<Option<StageResult>>,
    ) -> PipelineFailure {
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let results = StageResults::from_ordered(slots.into_iter().flatten().collect());

        tracing::error!(
            stage = %cause.stage,
            kind = %cause.kind,
            attempts = cause.attempts,
            error = %cause.message,
            "stage failed, aborting run"
        );
        self.log(
            ctx,
            LogEvent::new(LogLevel::Error, COMPONENT, format!("stage '{}' failed", cause.stage))
                .with_run(run_id)
                .with_details(json!({
                    "stage": cause.stage,
                    "kind": cause.kind,
                    "attempts": cause.attempts,
                    "message": cause.message,
                })),
        )
        .await;
        self.log(
            ctx,
            LogEvent::new(LogLevel::Error, COMPONENT, "run aborted")
                .with_run(run_id)
                .with_details(json!({
                    "failed_stage": cause.stage,
                    "collected": results.stages(),
                    "elapsed_ms": elapsed_ms,
                })),
        )
        .await;
        bounded(
            ctx.recorder_timeout,
            "record_run_completion",
            ctx.recorder
                .record_run_completion(run_id, RunStatus::Failed, elapsed),
        )
        .await;
        emit(
            &ctx.event_handler,
            Event::RunEnd {
                run_id,
                ok: false,
                elapsed_ms,
            },
        );

        PipelineFailure {
            run_id,
            stage: cause.stage.clone(),
            cause,
            results,
            elapsed_ms,
        }
    }

    async fn log(&self, ctx: &ExecCtx, event: LogEvent) {
        bounded(ctx.recorder_timeout, "log_event", ctx.recorder.log_event(&event)).await;
    }
}

/// Rebuild the terminal failure from an error-status result.
fn stage_failure(result: &StageResult) -> StageFailure {
    let (kind, message) = match &result.error {
        Some(detail) => (detail.kind, detail.message.clone()),
        None => (crate::error::FailureKind::Generic, "stage failed".to_string()),
    };
    StageFailure {
        stage: result.stage.clone(),
        kind,
        attempts: result.attempts,
        message,
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs and recorder events. Default: `"pipeline"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append several stages in order.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Validate the stage graph and build the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        let definitions: Vec<StageDefinition> =
            self.stages.iter().map(|s| s.definition.clone()).collect();
        let groups = graph::execution_groups(&definitions)?;
        Ok(Pipeline {
            name: self.name.unwrap_or_else(|| "pipeline".to_string()),
            stages: self.stages,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::error::FailureKind;
    use crate::events::FnEventHandler;
    use crate::rate_limit::RateLimiter;
    use crate::recorder::{MemoryRecorder, RunRecorder};
    use crate::retry::RetryPolicy;
    use crate::types::StageStatus;
    use crate::PipelineError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const OK: &str = "## Findings\n1. Demand is rising -- **Priority:** High\n2. Costs are falling";

    fn stage(id: &str) -> Stage {
        Stage::new(id, format!("You run stage [{}].", id), "Analyse {subject}")
    }

    fn ctx_with(backend: Arc<MockBackend>, recorder: Arc<dyn RunRecorder>) -> ExecCtx {
        ExecCtx::builder("http://mock")
            .backend(backend)
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .retry(RetryPolicy::default().with_base_delay(Duration::from_millis(100)))
            .recorder(recorder)
            .build()
            .unwrap()
    }

    fn ctx(backend: Arc<MockBackend>) -> ExecCtx {
        ctx_with(backend, Arc::new(MemoryRecorder::new()))
    }

    fn linear(n: usize) -> Pipeline {
        let mut builder = Pipeline::builder().name("linear");
        for i in 1..=n {
            let id = format!("s{}", i);
            let mut s = stage(&id);
            if i > 1 {
                let prev = format!("s{}", i - 1);
                s = s.depends_on(&[prev.as_str()]);
            }
            builder = builder.stage(s);
        }
        builder.build().unwrap()
    }

    fn diamond() -> Pipeline {
        Pipeline::builder()
            .name("diamond")
            .stage(stage("a"))
            .stage(stage("b").depends_on(&["a"]).in_group("fan"))
            .stage(stage("c").depends_on(&["a"]).in_group("fan"))
            .stage(stage("d").depends_on(&["b", "c"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_graph() {
        let err = Pipeline::builder()
            .stage(stage("a").depends_on(&["missing"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(Pipeline::builder().build().is_err());
    }

    #[test]
    fn test_plan_follows_groups() {
        assert_eq!(diamond().plan(), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_stages_succeed() {
        let backend = Arc::new(MockBackend::fixed(OK));
        let recorder = Arc::new(MemoryRecorder::new());
        let ctx = ctx_with(backend.clone(), recorder.clone());

        let report = diamond().run(&ctx, PipelineInput::new("EV charging")).await.unwrap();
        assert_eq!(report.results.stages(), vec!["a", "b", "c", "d"]);
        assert!(report.results.iter().all(StageResult::is_success));
        assert_eq!(backend.call_count(), 4);

        assert_eq!(recorder.stage_records().len(), 4);
        let completions = recorder.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].status, RunStatus::Completed);
        assert_eq!(completions[0].run_id, report.run_id);
        let messages: Vec<String> = recorder.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["run started", "run completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_fail_fast() {
        let backend = Arc::new(MockBackend::fixed(OK).route("[s3]", vec![MockReply::fail("model exploded")]));
        let recorder = Arc::new(MemoryRecorder::new());
        let ctx = ctx_with(backend.clone(), recorder.clone());

        let failure = linear(5).run(&ctx, PipelineInput::new("x")).await.unwrap_err();
        assert_eq!(failure.stage, "s3");
        assert_eq!(failure.cause.kind, FailureKind::Generic);
        assert_eq!(failure.cause.attempts, 3);
        assert_eq!(failure.results.stages(), vec!["s1", "s2", "s3"]);
        assert_eq!(failure.results.get("s3").map(|r| r.status), Some(StageStatus::Error));
        assert_eq!(backend.calls_for("[s3]"), 3);
        assert_eq!(backend.call_count(), 2 + 3);

        assert_eq!(recorder.stage_records().len(), 3);
        assert_eq!(recorder.completions()[0].status, RunStatus::Failed);
        let messages: Vec<String> = recorder.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["run started", "stage 's3' failed", "run aborted"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_member_failure_aborts_run() {
        let backend = Arc::new(
            MockBackend::fixed(OK)
                .route("[b]", vec![MockReply::rate_limited()])
                .route("[d]", vec![MockReply::text(OK)]),
        );
        let ctx = ctx(backend.clone());

        let failure = diamond().run(&ctx, PipelineInput::new("x")).await.unwrap_err();
        assert_eq!(failure.stage, "b");
        assert_eq!(failure.cause.kind, FailureKind::RateLimited);
        assert_eq!(failure.results.stages(), vec!["a", "b", "c"]);
        assert!(failure.results.get("c").is_some_and(StageResult::is_success));
        assert_eq!(backend.calls_for("[d]"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downstream_prompt_sees_upstream_records() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let pipeline = Pipeline::builder()
            .stage(stage("a"))
            .stage(stage("b").depends_on(&["a"]).in_group("fan"))
            .stage(stage("c").depends_on(&["a"]).in_group("fan"))
            .stage(Stage::new("d", "[d]", "").depends_on(&["b"]).with_formatter(move |input, view| {
                let prompt = format!(
                    "{}|b={}|c={}",
                    input.subject,
                    view.record("b").map(|r| r.item_count()).unwrap_or(0),
                    view.get("c").is_some()
                );
                *sink.lock().unwrap() = prompt.clone();
                prompt
            }))
            .build()
            .unwrap();
        let ctx = ctx(Arc::new(MockBackend::fixed(OK)));

        pipeline.run(&ctx, PipelineInput::new("grid storage")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), "grid storage|b=2|c=false");
    }

    async fn run_with_latencies(b: Duration, c: Duration) -> StageResults {
        let backend = Arc::new(
            MockBackend::fixed(OK)
                .route("[b]", vec![MockReply::text("## B\n1. from b")])
                .route_latency("[b]", b)
                .route("[c]", vec![MockReply::text("## C\n1. from c")])
                .route_latency("[c]", c),
        );
        let ctx = ctx(backend);
        let report = diamond().run_with_id(&ctx, Uuid::nil(), PipelineInput::new("x")).await.unwrap();
        report.results
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_independent_of_completion_order() {
        let fast_b = run_with_latencies(Duration::from_secs(1), Duration::from_secs(5)).await;
        let fast_c = run_with_latencies(Duration::from_secs(5), Duration::from_secs(1)).await;

        assert_eq!(fast_b.stages(), fast_c.stages());
        for (left, right) in fast_b.iter().zip(fast_c.iter()) {
            assert_eq!(left.record, right.record);
            assert_eq!(left.raw_text, right.raw_text);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_members_share_the_pacing_gate() {
        let backend = Arc::new(MockBackend::fixed(OK));
        let ctx = ExecCtx::builder("http://mock")
            .backend(backend.clone())
            .rate_limiter(Arc::new(RateLimiter::new(Duration::from_secs(2), Duration::ZERO)))
            .build()
            .unwrap();

        diamond().run(&ctx, PipelineInput::new("x")).await.unwrap();
        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 4);
        for pair in dispatches.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_in_order() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        let handler = Arc::new(FnEventHandler(move |event: Event| {
            let name = match event {
                Event::RunStart { .. } => "run_start".to_string(),
                Event::GroupStart { index, .. } => format!("group_{}", index),
                Event::StageStart { stage } => format!("start_{}", stage),
                Event::StageParsed { stage, .. } => format!("parsed_{}", stage),
                Event::StageEnd { stage, .. } => format!("end_{}", stage),
                Event::InvocationRetry { .. } => "retry".to_string(),
                Event::RunEnd { ok, .. } => format!("run_end_{}", ok),
            };
            sink.lock().unwrap().push(name);
        }));
        let ctx = ExecCtx::builder("http://mock")
            .backend(Arc::new(MockBackend::fixed(OK)))
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .event_handler(handler)
            .build()
            .unwrap();

        linear(2).run(&ctx, PipelineInput::new("x")).await.unwrap();
        assert_eq!(
            *names.lock().unwrap(),
            vec![
                "run_start",
                "group_0",
                "start_s1",
                "parsed_s1",
                "end_s1",
                "group_1",
                "start_s2",
                "parsed_s2",
                "end_s2",
                "run_end_true"
            ]
        );
    }

    struct BrokenRecorder {
        hang: bool,
    }

    #[async_trait]
    impl RunRecorder for BrokenRecorder {
        async fn record_stage_result(&self, _record: &StageRecord) -> Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(PipelineError::Recorder("disk full".into()))
        }

        async fn record_run_completion(&self, _run_id: Uuid, _status: RunStatus, _elapsed: Duration) -> Result<()> {
            Err(PipelineError::Recorder("disk full".into()))
        }

        async fn log_event(&self, _event: &LogEvent) -> Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_failures_never_fail_the_run() {
        for hang in [false, true] {
            let ctx = ctx_with(Arc::new(MockBackend::fixed(OK)), Arc::new(BrokenRecorder { hang }));
            let report = linear(3).run(&ctx, PipelineInput::new("x")).await;
            assert!(report.is_ok(), "hang={}", hang);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_id_is_propagated() {
        let recorder = Arc::new(MemoryRecorder::new());
        let ctx = ctx_with(Arc::new(MockBackend::fixed(OK)), recorder.clone());
        let id = Uuid::new_v4();

        let report = linear(1).run_with_id(&ctx, id, PipelineInput::new("x")).await.unwrap();
        assert_eq!(report.run_id, id);
        assert!(recorder.stage_records().iter().all(|r| r.run_id == id));
        assert!(recorder.events().iter().all(|e| e.run_id == Some(id)));
    }
}
