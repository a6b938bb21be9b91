//! Example: the strategic-analysis pipeline with a scripted backend.
//!
//! The horizon-scanning stage is rate limited on every attempt, so the run
//! aborts after the research group and reports what completed.
//!
//! Run with: `RUST_LOG=strategy_pipeline=debug cargo run --example mock_run`

use strategy_pipeline::analysis::{self, AnalysisRequest};
use strategy_pipeline::{ExecCtx, MemoryRecorder, MockBackend, MockReply, RateLimiter, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REPLY: &str = "\
## Key Insights
1. **Charging scarcity** limits adoption -- **Priority:** High
2. Fleet operators move first -- **Priority:** Medium
   - logistics and ride-hailing lead";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let backend = Arc::new(
        MockBackend::fixed(REPLY).route(
            "Horizon Scanning Agent",
            vec![MockReply::RateLimited(Some(Duration::from_millis(200)))],
        ),
    );
    let recorder = Arc::new(MemoryRecorder::new());

    let ctx = ExecCtx::builder("http://mock")
        .backend(backend.clone())
        .recorder(recorder.clone())
        .rate_limiter(Arc::new(RateLimiter::new(Duration::from_millis(50), Duration::from_millis(10))))
        .retry(
            RetryPolicy::default()
                .with_base_delay(Duration::from_millis(100))
                .with_rate_limit_jitter(Duration::from_millis(50)),
        )
        .build()?;

    let pipeline = analysis::strategic_analysis()?;
    println!("plan: {:?}", pipeline.plan());

    let request = AnalysisRequest::new("Should we build a charging network in Nairobi?");
    match pipeline.run(&ctx, request.into()).await {
        Ok(report) => println!("unexpected success: {} stages", report.results.len()),
        Err(failure) => {
            println!("aborted at '{}' ({}, {} attempts)", failure.stage, failure.cause.kind, failure.cause.attempts);
            for result in &failure.results {
                println!("  {:<20} {}", result.stage, result.status.as_str());
            }
        }
    }

    println!("backend calls: {}", backend.call_count());
    println!("recorded stage results: {}", recorder.stage_records().len());
    for event in recorder.events() {
        println!("log [{:?}] {}", event.level, event.message);
    }
    Ok(())
}
