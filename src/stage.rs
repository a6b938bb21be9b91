//! Stage definitions: one prompt-format, invoke, parse unit.

use crate::backend::{LlmConfig, LlmRequest};
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::invoker::invoke;
use crate::output_parser::{parse, ParserProfile};
use crate::prompt;
use crate::types::{ContextView, PipelineContext, PipelineInput, StageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

/// How a stage is scheduled relative to its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Runs alone, after every earlier group.
    #[default]
    Sequential,
    /// Runs concurrently with the other members of the named group.
    Group(String),
}

/// Static descriptor of a stage: identity, upstream dependencies and
/// scheduling. Immutable once the pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl StageDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            concurrency: Concurrency::Sequential,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.concurrency = Concurrency::Group(group.into());
        self
    }

    /// Name of the parallel group, if any.
    pub fn group(&self) -> Option<&str> {
        match &self.concurrency {
            Concurrency::Sequential => None,
            Concurrency::Group(name) => Some(name),
        }
    }
}

/// Custom prompt builder. Receives only the stage's declared dependencies.
pub type PromptFormatter = Arc<dyn Fn(&PipelineInput, ContextView<'_>) -> String + Send + Sync>;

/// A single stage in the pipeline.
#[derive(Clone)]
pub struct Stage {
    pub definition: StageDefinition,

    /// System instruction sent with every attempt.
    pub system_prompt: String,

    /// Prompt template; see [`prompt::render`] for placeholders.
    pub prompt_template: String,

    formatter: Option<PromptFormatter>,

    /// What the reply parser should expect.
    pub profile: ParserProfile,

    /// Overrides [`ExecCtx::model`] for this stage.
    pub model: Option<String>,

    /// Overrides [`ExecCtx::llm_config`] for this stage.
    pub config: Option<LlmConfig>,
}

impl Stage {
    /// Create a sequential stage with no dependencies.
    pub fn new(
        id: impl Into<String>,
        system_prompt: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            definition: StageDefinition::new(id),
            system_prompt: system_prompt.into(),
            prompt_template: prompt_template.into(),
            formatter: None,
            profile: ParserProfile::default(),
            model: None,
            config: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.definition = self.definition.depends_on(deps);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.definition = self.definition.in_group(group);
        self
    }

    /// Build the prompt with a closure instead of the template.
    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&PipelineInput, ContextView<'_>) -> String + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    pub fn with_profile(mut self, profile: ParserProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Render the user prompt from the input and this stage's dependencies.
    pub fn render_prompt(&self, input: &PipelineInput, context: &PipelineContext) -> String {
        let view = context.view(&self.definition.depends_on);
        match &self.formatter {
            Some(formatter) => formatter(input, view),
            None => prompt::render(&self.prompt_template, input, view),
        }
    }

    /// The backend request for this stage under `ctx`'s defaults.
    pub fn build_request(&self, ctx: &ExecCtx, input: &PipelineInput, context: &PipelineContext) -> LlmRequest {
        LlmRequest {
            model: self.model.clone().unwrap_or_else(|| ctx.model.clone()),
            system_prompt: self.system_prompt.clone(),
            prompt: self.render_prompt(input, context),
            config: self.config.clone().unwrap_or_else(|| ctx.llm_config.clone()),
        }
    }

    /// Format, invoke and parse. Failures are returned as an error-status
    /// result, never as `Err`.
    pub async fn execute(&self, ctx: &ExecCtx, input: &PipelineInput, context: &PipelineContext) -> StageResult {
        let span = tracing::info_span!("stage", stage = %self.id());
        self.execute_inner(ctx, input, context).instrument(span).await
    }

    async fn execute_inner(&self, ctx: &ExecCtx, input: &PipelineInput, context: &PipelineContext) -> StageResult {
        let started = Instant::now();
        emit(&ctx.event_handler, Event::StageStart { stage: self.id().to_string() });

        let request = self.build_request(ctx, input, context);
        tracing::debug!(
            model = %request.model,
            prompt_chars = request.prompt.len(),
            "stage prompt rendered"
        );

        let result = match invoke(ctx, self.id(), &request).await {
            Ok(invocation) => {
                let record = parse(&invocation.text, &self.profile);
                emit(
                    &ctx.event_handler,
                    Event::StageParsed {
                        stage: self.id().to_string(),
                        tier: record.tier,
                        sections: record.sections.len(),
                        items: record.item_count(),
                    },
                );
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    elapsed_ms,
                    attempts = invocation.attempts,
                    tier = %record.tier,
                    items = record.item_count(),
                    "stage completed"
                );
                StageResult::success(self.id(), record, invocation.text, elapsed_ms, invocation.attempts)
            }
            Err(failure) => StageResult::failure(&failure, started.elapsed().as_millis() as u64),
        };

        emit(
            &ctx.event_handler,
            Event::StageEnd {
                stage: self.id().to_string(),
                ok: result.is_success(),
                elapsed_ms: result.elapsed_ms,
            },
        );
        result
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("definition", &self.definition)
            .field("has_formatter", &self.formatter.is_some())
            .field("profile", &self.profile)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::error::FailureKind;
    use crate::rate_limit::RateLimiter;
    use crate::record::ParseTier;
    use crate::retry::RetryPolicy;
    use crate::types::StageStatus;
    use std::time::Duration;

    fn ctx(backend: MockBackend) -> ExecCtx {
        ExecCtx::builder("http://mock")
            .backend(Arc::new(backend))
            .rate_limiter(Arc::new(RateLimiter::unlimited()))
            .retry(RetryPolicy::default().with_base_delay(Duration::from_millis(10)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_definition_builders() {
        let def = StageDefinition::new("b").depends_on(&["a"]).in_group("research");
        assert_eq!(def.depends_on, vec!["a".to_string()]);
        assert_eq!(def.group(), Some("research"));
        assert_eq!(StageDefinition::new("a").group(), None);
    }

    #[test]
    fn test_formatter_sees_only_dependencies() {
        let mut context = PipelineContext::new();
        let record = crate::output_parser::parse("## A\n1. x", &ParserProfile::new());
        context.insert(StageResult::success("a", record.clone(), "raw", 1, 1));
        context.insert(StageResult::success("other", record, "raw", 1, 1));

        let stage = Stage::new("b", "sys", "").depends_on(&["a"]).with_formatter(|input, view| {
            format!(
                "{} a={} other={}",
                input.subject,
                view.get("a").is_some(),
                view.get("other").is_some()
            )
        });
        assert_eq!(
            stage.render_prompt(&PipelineInput::new("topic"), &context),
            "topic a=true other=false"
        );
    }

    #[test]
    fn test_request_overrides() {
        let ctx = ctx(MockBackend::fixed(""));
        let input = PipelineInput::new("topic");
        let context = PipelineContext::new();

        let plain = Stage::new("a", "sys", "About {subject}").build_request(&ctx, &input, &context);
        assert_eq!(plain.model, ctx.model);
        assert_eq!(plain.prompt, "About topic");
        assert_eq!(plain.config, ctx.llm_config);

        let tuned = Stage::new("a", "sys", "x")
            .with_model("mistral-small-latest")
            .with_config(LlmConfig::default().with_temperature(0.1))
            .build_request(&ctx, &input, &context);
        assert_eq!(tuned.model, "mistral-small-latest");
        assert_eq!(tuned.config.temperature, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_success() {
        let ctx = ctx(MockBackend::fixed("## Findings\n1. Demand is rising"));
        let stage = Stage::new("a", "sys", "About {subject}");
        let result = stage
            .execute(&ctx, &PipelineInput::new("topic"), &PipelineContext::new())
            .await;
        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.tier(), Some(ParseTier::Strict));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.raw_text.as_deref(), Some("## Findings\n1. Demand is rising"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_failure_is_error_status() {
        let ctx = ctx(MockBackend::new(vec![MockReply::rate_limited()]));
        let stage = Stage::new("a", "sys", "x");
        let result = stage
            .execute(&ctx, &PipelineInput::new("topic"), &PipelineContext::new())
            .await;
        assert_eq!(result.status, StageStatus::Error);
        assert!(result.record.is_none());
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error.map(|e| e.kind), Some(FailureKind::RateLimited));
    }
}
