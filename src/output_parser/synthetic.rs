//! Synthetic tier: the unconditional last resort.

use crate::output_parser::extract::{list_line, strip_emphasis};
use crate::output_parser::ParserProfile;
use crate::record::{Item, ParseTier, Section, StructuredRecord};

pub const DEFAULT_FALLBACK_TITLE: &str = "Unstructured Response";
pub const EMPTY_RESPONSE_SUMMARY: &str = "No content returned by the model.";
pub const DEFAULT_PLACEHOLDERS: &[&str] = &[
    "Review the full response manually",
    "Re-run this stage with a clearer prompt",
    "Validate findings with domain experts",
];

/// Number of raw lines kept as the synthetic section's summary.
const SUMMARY_LINES: usize = 3;

/// Build a one-section record from whatever text is available.
///
/// Every item carries `synthetic = "true"`. Never fails.
pub fn parse_synthetic(text: &str, profile: &ParserProfile) -> StructuredRecord {
    let title = profile
        .fallback_title
        .as_deref()
        .unwrap_or(DEFAULT_FALLBACK_TITLE);

    let lines: Vec<String> = text
        .lines()
        .filter_map(meaningful_line)
        .take(SUMMARY_LINES)
        .collect();
    let summary = if lines.is_empty() {
        EMPTY_RESPONSE_SUMMARY.to_string()
    } else {
        lines.join(" ")
    };

    let mut section = Section::new(title).with_summary(summary);
    if profile.placeholders.is_empty() {
        section.items = DEFAULT_PLACEHOLDERS.iter().map(|p| Item::placeholder(*p)).collect();
    } else {
        section.items = profile.placeholders.iter().map(Item::placeholder).collect();
    }

    StructuredRecord::new(ParseTier::Synthetic).with_section(section)
}

/// A line with its markup removed, or `None` if nothing readable is left.
fn meaningful_line(line: &str) -> Option<String> {
    let content = match list_line(line) {
        Some(list) => list.content,
        None => line.trim(),
    };
    let cleaned = strip_emphasis(content.trim_start_matches('#')).trim().to_string();
    cleaned.chars().any(char::is_alphanumeric).then_some(cleaned)
}
