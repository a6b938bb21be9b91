//! Example: the built-in strategic-analysis pipeline against a live provider.
//!
//! Reads settings from the environment (`PIPELINE_*`, `LLM_API_KEY` or
//! `MISTRAL_API_KEY`).
//!
//! Run with: `RUST_LOG=strategy_pipeline=info cargo run --example strategic_analysis -- "your question"`

use strategy_pipeline::analysis::{self, AnalysisRequest};
use strategy_pipeline::{Event, ExecCtx, FnEventHandler, LlmConfig, PipelineConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How can a mid-sized utility profit from EV adoption?".to_string());

    let config = PipelineConfig::from_env()?;
    if config.api_key.is_none() {
        eprintln!("warning: no LLM_API_KEY or MISTRAL_API_KEY set, requests will likely be rejected");
    }

    // Progress on stderr, results on stdout
    let progress = Arc::new(FnEventHandler(|event: Event| match event {
        Event::GroupStart { index, stages } => eprintln!("[group {}] {}", index, stages.join(", ")),
        Event::StageEnd { stage, ok, elapsed_ms } => {
            eprintln!("  {} {} ({} ms)", if ok { "done" } else { "FAILED" }, stage, elapsed_ms)
        }
        Event::InvocationRetry { stage, attempt, kind, delay_ms, .. } => {
            eprintln!("  retry {} attempt {} after {} ({} ms)", stage, attempt, kind, delay_ms)
        }
        _ => {}
    }));

    let mut builder = ExecCtx::builder(&config.base_url)
        .model(&config.model)
        .llm_config(
            LlmConfig::default()
                .with_temperature(config.temperature)
                .with_max_tokens(config.max_tokens),
        )
        .rate_limiter(Arc::new(config.rate_limiter()))
        .retry(config.retry_policy())
        .attempt_timeout(config.attempt_timeout())
        .event_handler(progress);
    if let Some(ref key) = config.api_key {
        builder = builder.api_key(key);
    }
    let ctx = builder.build()?;

    let request = AnalysisRequest::new(question)
        .with_scope(&["market entry", "partnerships"])
        .with_time_frame("2025-2035");

    let pipeline = analysis::strategic_analysis()?;
    match pipeline.run(&ctx, request.into()).await {
        Ok(report) => {
            for result in &report.results {
                if let Some(ref record) = result.record {
                    let flag = if record.is_low_confidence() { " (low confidence)" } else { "" };
                    println!("# {}{}\n\n{}\n", result.stage, flag, record.to_markdown());
                }
            }
            eprintln!("run {} finished in {} ms", report.run_id, report.elapsed_ms);
        }
        Err(failure) => {
            eprintln!("{}", failure);
            eprintln!("completed before abort: {:?}", failure.results.stages());
            std::process::exit(1);
        }
    }
    Ok(())
}
