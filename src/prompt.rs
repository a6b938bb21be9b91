//! Prompt template rendering.
//!
//! Placeholders are `{key}` and `{stage.section}`:
//!
//! | Placeholder | Replaced by |
//! |-------------|-------------|
//! | `{subject}` | the run's subject |
//! | `{name}` | input parameter `name` |
//! | `{dep}` | a declared dependency's record, as prompt text |
//! | `{dep.section}` | one section of a dependency's record, as a bullet list |
//!
//! Dependency placeholders resolve to `N/A` when the record or section is
//! missing. Placeholders naming anything else are left untouched. Use `{{`
//! and `}}` for literal braces.

use crate::record::bullet_list;
use crate::types::{ContextView, PipelineInput};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Rendered in place of an upstream value that is not available.
pub const MISSING: &str = "N/A";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z0-9_]+))?\}").expect("valid placeholder regex")
});

/// Render `template` against the run input and a stage's dependency view.
///
/// # Example
///
/// ```
/// use strategy_pipeline::prompt::render;
/// use strategy_pipeline::{PipelineContext, PipelineInput};
///
/// let input = PipelineInput::new("EV charging").with_param("region", "EU");
/// let context = PipelineContext::new();
/// let deps: Vec<String> = Vec::new();
/// let out = render("Analyse {subject} in {region}. JSON: {{}}", &input, context.view(&deps));
/// assert_eq!(out, "Analyse EV charging in EU. JSON: {}");
/// ```
pub fn render(template: &str, input: &PipelineInput, view: ContextView<'_>) -> String {
    let protected = template
        .replace("{{", ESCAPE_SENTINEL)
        .replace("}}", ESCAPE_SENTINEL_CLOSE);

    let rendered = PLACEHOLDER.replace_all(&protected, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let key = caps.get(1).map_or("", |m| m.as_str());
        match caps.get(2) {
            Some(section) => dependency_section(view, key, section.as_str())
                .unwrap_or_else(|| whole.to_string()),
            None => resolve(key, input, view).unwrap_or_else(|| whole.to_string()),
        }
    });

    rendered
        .replace(ESCAPE_SENTINEL, "{")
        .replace(ESCAPE_SENTINEL_CLOSE, "}")
}

fn resolve(key: &str, input: &PipelineInput, view: ContextView<'_>) -> Option<String> {
    if key == "subject" {
        return Some(input.subject.clone());
    }
    if let Some(value) = input.param(key) {
        return Some(value.to_string());
    }
    if !is_dependency(view, key) {
        return None;
    }
    Some(
        view.record(key)
            .map(|r| r.to_prompt_text())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| MISSING.to_string()),
    )
}

/// `None` when `stage` is not a declared dependency.
fn dependency_section(view: ContextView<'_>, stage: &str, section: &str) -> Option<String> {
    if !is_dependency(view, stage) {
        return None;
    }
    let rendered = view
        .record(stage)
        .and_then(|r| r.section(section))
        .map(|s| {
            if s.items.is_empty() {
                s.summary.clone()
            } else {
                bullet_list(&s.items)
            }
        })
        .filter(|t| !t.trim().is_empty());
    Some(rendered.unwrap_or_else(|| MISSING.to_string()))
}

fn is_dependency(view: ContextView<'_>, stage: &str) -> bool {
    view.dependencies().iter().any(|d| d == stage)
}
