//! # Strategy Pipeline
//!
//! Multi-stage LLM analysis: a declared graph of stages, each of which
//! formats a prompt from the run input and upstream results, calls a
//! rate-limited text-generation backend, and parses the free-form reply into
//! a [`StructuredRecord`].
//!
//! ## Core Concepts
//!
//! - **[`Stage`]**: system instruction, prompt template (or formatter
//!   closure), [`ParserProfile`] and a [`StageDefinition`] naming its
//!   dependencies and parallel group.
//! - **[`Pipeline`]**: validates the stage graph, runs execution groups in
//!   order (parallel groups concurrently) and aborts on the first failure.
//! - **[`ExecCtx`]**: shared runtime: HTTP client, [`Backend`], model
//!   settings, the process-wide [`RateLimiter`], [`RetryPolicy`], timeouts,
//!   [`RunRecorder`] and an optional event handler.
//! - **[`output_parser`]**: strict, loose and synthetic parsing tiers. Parsing
//!   never fails; the worst case is a record flagged as synthetic.
//! - **[`analysis`]**: the built-in eight-stage strategic-analysis pipeline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strategy_pipeline::analysis::{self, AnalysisRequest};
//! use strategy_pipeline::{ExecCtx, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::from_config(&PipelineConfig::from_env()?)?;
//!     let pipeline = analysis::strategic_analysis()?;
//!
//!     let request = AnalysisRequest::new("How should we enter the EV charging market?")
//!         .with_region("East Africa")
//!         .with_time_frame("2025-2035");
//!
//!     match pipeline.run(&ctx, request.into()).await {
//!         Ok(report) => {
//!             for result in &report.results {
//!                 if let Some(record) = &result.record {
//!                     println!("# {}\n{}\n", result.stage, record.to_markdown());
//!                 }
//!             }
//!         }
//!         Err(failure) => eprintln!("{}", failure),
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod graph;
pub mod invoker;
pub mod output_parser;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod record;
pub mod recorder;
pub mod retry;
pub mod stage;
pub mod types;

pub use backend::{Backend, LlmConfig, LlmRequest, LlmResponse, MockBackend, MockReply, OpenAiBackend};
pub use config::PipelineConfig;
pub use error::{
    FailureKind, InvocationError, PipelineError, PipelineFailure, Result, StageFailure,
};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use graph::ExecutionGroup;
pub use invoker::{invoke, Invocation};
pub use output_parser::{parse, ParserProfile};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use rate_limit::RateLimiter;
pub use record::{Item, ParseTier, Section, StructuredRecord};
pub use recorder::{LogEvent, LogLevel, MemoryRecorder, NoopRecorder, RunRecorder, StageRecord};
pub use retry::{RetryPolicy, RetryState, Transition};
pub use stage::{Concurrency, Stage, StageDefinition};
pub use types::{
    ContextView, ErrorDetail, FinalResult, PipelineContext, PipelineInput, RunReport, RunStatus,
    StageResult, StageResults, StageStatus,
};
