//! Example: a hand-built pipeline with a parallel group and a custom prompt
//! formatter.
//!
//! Run with: `cargo run --example custom_pipeline`

use strategy_pipeline::output_parser::ParserProfile;
use strategy_pipeline::{ExecCtx, MockBackend, MockReply, Pipeline, PipelineInput, RateLimiter, Stage};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let backend = MockBackend::fixed("## Verdict\n1. Proceed with a pilot")
        .route(
            "[strengths]",
            vec![MockReply::text("## Strengths\n1. Strong brand -- **Impact:** High\n2. Loyal customers")],
        )
        .route(
            // Off-format reply: recovered by the loose tier
            "[weaknesses]",
            vec![MockReply::text("Main weaknesses we see\n- Thin margins (impact: medium)\n- Slow IT")],
        );

    let ctx = ExecCtx::builder("http://mock")
        .backend(Arc::new(backend))
        .rate_limiter(Arc::new(RateLimiter::unlimited()))
        .build()?;

    let fields = ParserProfile::new().with_fields(&["Impact"]);
    let pipeline = Pipeline::builder()
        .name("swot-lite")
        .stage(
            Stage::new("strengths", "[strengths] You list strengths.", "Strengths of {subject}?")
                .in_group("swot")
                .with_profile(fields.clone()),
        )
        .stage(
            Stage::new("weaknesses", "[weaknesses] You list weaknesses.", "Weaknesses of {subject}?")
                .in_group("swot")
                .with_profile(fields),
        )
        .stage(
            Stage::new("verdict", "You decide.", "")
                .depends_on(&["strengths", "weaknesses"])
                .with_formatter(|input, view| {
                    let count = |id: &str| view.record(id).map_or(0, |r| r.item_count());
                    format!(
                        "Decide on {} given {} strengths and {} weaknesses.",
                        input.subject,
                        count("strengths"),
                        count("weaknesses")
                    )
                }),
        )
        .build()?;

    let report = pipeline
        .run(&ctx, PipelineInput::new("opening a second store"))
        .await?;
    for result in &report.results {
        let record = result.record.as_ref().ok_or("missing record")?;
        println!("== {} [{}]\n{}\n", result.stage, record.tier, record.to_markdown());
    }
    Ok(())
}
