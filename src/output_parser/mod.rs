//! # Structured Response Parser
//!
//! Turns a free-form LLM reply into a [`StructuredRecord`] without an extra
//! model call. Parsing is total: a reply that follows no recognizable
//! convention degrades to a synthetic placeholder record, never to an error.
//!
//! ## Tiers
//!
//! | Tier | Function | Succeeds when |
//! |------|----------|---------------|
//! | Strict | [`parse_strict`] | headings + list items in the documented convention |
//! | Loose | [`parse_loose`] | any list items, with keyword/paragraph segmentation |
//! | Synthetic | [`parse_synthetic`] | always |
//!
//! [`parse`] preprocesses the reply (see [`preprocess`]), runs the first two
//! tiers first-success-wins, fills in required sections and falls back to
//! the synthetic tier.
//!
//! ```
//! use strategy_pipeline::output_parser::{parse, ParserProfile};
//! use strategy_pipeline::ParseTier;
//!
//! let profile = ParserProfile::new().with_fields(&["Priority"]);
//! let record = parse("## Actions\n1. Expand -- **Priority:** High", &profile);
//! assert_eq!(record.tier, ParseTier::Strict);
//! assert_eq!(record.sections[0].items[0].attribute("priority"), Some("High"));
//! ```

pub mod assemble;
pub mod extract;
pub mod loose;
pub mod strict;
pub mod synthetic;

pub use extract::{preprocess, strip_think_tags};
use extract::strip_title_decorations;
pub use loose::parse_loose;
pub use strict::parse_strict;
pub use synthetic::parse_synthetic;

use crate::record::{slugify, Item, Section, StructuredRecord};
use serde::{Deserialize, Serialize};

/// What a stage's parser should expect from the reply.
///
/// Section names make bare title lines recognizable as headings; field
/// names make plain `Label: value` text recognizable as item attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserProfile {
    pub sections: Vec<String>,
    pub fields: Vec<String>,
    /// Add a placeholder section for every expected section the reply omitted.
    #[serde(default)]
    pub require_sections: bool,
    /// Title of the synthetic section. Default: [`synthetic::DEFAULT_FALLBACK_TITLE`].
    #[serde(default)]
    pub fallback_title: Option<String>,
    /// Items of the synthetic section. Default: [`synthetic::DEFAULT_PLACEHOLDERS`].
    #[serde(default)]
    pub placeholders: Vec<String>,
}

impl ParserProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sections(mut self, sections: &[&str]) -> Self {
        self.sections = sections.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Mark the expected sections as required.
    pub fn required(mut self) -> Self {
        self.require_sections = true;
        self
    }

    pub fn with_fallback_title(mut self, title: impl Into<String>) -> Self {
        self.fallback_title = Some(title.into());
        self
    }

    pub fn with_placeholders(mut self, placeholders: &[&str]) -> Self {
        self.placeholders = placeholders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// `text` names an expected section, ignoring case, punctuation, a
    /// leading ordinal and a trailing parenthetical.
    pub fn is_known_section(&self, text: &str) -> bool {
        self.exact_section(text).is_some()
    }

    pub(crate) fn exact_section(&self, title: &str) -> Option<&str> {
        let wanted = slugify(&strip_title_decorations(title));
        if wanted.is_empty() {
            return None;
        }
        self.sections().find(|s| slugify(s) == wanted)
    }

    /// The expected section a heading refers to: an exact match, or else the
    /// longest expected name contained in the title as whole words.
    ///
    /// ```
    /// use strategy_pipeline::output_parser::ParserProfile;
    ///
    /// let profile = ParserProfile::new().with_sections(&["Short-term Actions", "Actions"]);
    /// assert_eq!(profile.canonical_section("Short-term Actions (0-1 year)"), Some("Short-term Actions"));
    /// assert_eq!(profile.canonical_section("Proposed short term actions"), Some("Short-term Actions"));
    /// assert_eq!(profile.canonical_section("Interactions"), None);
    /// ```
    pub fn canonical_section(&self, title: &str) -> Option<&str> {
        if let Some(name) = self.exact_section(title) {
            return Some(name);
        }
        let padded = format!("_{}_", slugify(&strip_title_decorations(title)));
        self.sections()
            .filter(|s| {
                let slug = slugify(s);
                !slug.is_empty() && padded.contains(&format!("_{}_", slug))
            })
            .max_by_key(|s| slugify(s).len())
    }

    /// `text` names a labeled field, ignoring case and punctuation.
    pub fn is_known_field(&self, text: &str) -> bool {
        matches_any(&self.fields, text)
    }
}

fn matches_any(names: &[String], text: &str) -> bool {
    let wanted = slugify(text);
    !wanted.is_empty() && names.iter().any(|n| slugify(n) == wanted)
}

/// A parsing tier that may decline.
pub type Tier = fn(&str, &ParserProfile) -> Option<StructuredRecord>;

/// The tiers tried before the synthetic fallback, most precise first.
pub const STRUCTURED_TIERS: [Tier; 2] = [parse_strict, parse_loose];

/// Run `tiers` in order and return the first record produced.
pub fn first_success(text: &str, profile: &ParserProfile, tiers: &[Tier]) -> Option<StructuredRecord> {
    tiers.iter().find_map(|tier| {
        let record = tier(text, profile);
        if let Some(ref r) = record {
            tracing::trace!(tier = %r.tier, sections = r.sections.len(), items = r.item_count(), "tier matched");
        }
        record
    })
}

/// Parse a raw reply. Never fails; the result always holds at least one
/// section with at least one item.
pub fn parse(raw: &str, profile: &ParserProfile) -> StructuredRecord {
    let text = preprocess(raw);
    match first_success(&text, profile, &STRUCTURED_TIERS) {
        Some(mut record) => {
            if profile.require_sections {
                complete_required(&mut record, profile);
            }
            record
        }
        None => {
            tracing::warn!(
                raw_chars = raw.len(),
                "no structure recognized in reply, using synthetic record"
            );
            parse_synthetic(&text, profile)
        }
    }
}

/// Append a placeholder section for every expected section that is missing.
pub fn complete_required(record: &mut StructuredRecord, profile: &ParserProfile) {
    for name in profile.sections() {
        if record.section(name).is_some() {
            continue;
        }
        tracing::debug!(section = name, "required section missing, adding placeholder");
        record.sections.push(
            Section::new(name).with_item(Item::placeholder(format!(
                "No specific {} identified",
                name.to_lowercase()
            ))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ParseTier;

    fn profile() -> ParserProfile {
        ParserProfile::new()
            .with_sections(&["Key Insights", "Recommendations"])
            .with_fields(&["Priority", "Impact", "Timeframe"])
    }

    #[test]
    fn test_priority_scenario_through_cascade() {
        let text = "## Items\n1. **Do X** - detail -- **Priority:** High\n2. **Do Y** - detail -- **Priority:** Low";
        let record = parse(text, &ParserProfile::new());
        assert_eq!(record.tier, ParseTier::Strict);
        assert_eq!(record.sections.len(), 1);
        let attrs: Vec<_> = record.items().map(|i| i.attributes.clone()).collect();
        assert_eq!(attrs[0].get("priority").map(String::as_str), Some("High"));
        assert_eq!(attrs[1].get("priority").map(String::as_str), Some("Low"));
    }

    #[test]
    fn test_single_sentence_is_synthetic() {
        let record = parse("I am not sure what you mean.", &profile());
        assert_eq!(record.tier, ParseTier::Synthetic);
        assert_eq!(record.sections.len(), 1);
        assert!(!record.sections[0].items.is_empty());
        assert!(record.sections[0].items.iter().all(Item::is_synthetic));
        assert!(record.is_low_confidence());
    }

    #[test]
    fn test_never_empty() {
        let inputs = [
            "",
            "   \n\n  ",
            "<think>only reasoning</think>",
            "```\n```",
            "## Heading only",
            "---\n***\n___",
            "Priority: High",
            "1.",
            "- ",
            "\u{2022}",
        ];
        for input in inputs {
            let record = parse(input, &profile());
            assert!(!record.sections.is_empty(), "no section for {:?}", input);
            assert!(record.item_count() > 0, "no item for {:?}", input);
        }
    }

    #[test]
    fn test_loose_used_when_strict_fails() {
        let record = parse("Some preamble.\n\n- Item A\n- Item B", &profile());
        assert_eq!(record.tier, ParseTier::Loose);
        assert_eq!(record.item_count(), 2);
    }

    #[test]
    fn test_fenced_reply_with_reasoning() {
        let raw = "<think>the user wants insights</think>\n```markdown\n## Key Insights\n1. Demand is shifting online\n```";
        let record = parse(raw, &profile());
        assert_eq!(record.tier, ParseTier::Strict);
        assert_eq!(record.sections[0].items[0].text, "Demand is shifting online");
    }

    #[test]
    fn test_required_sections_completed() {
        let raw = "## Key Insights\n1. Demand is shifting online";
        let record = parse(raw, &profile().required());
        assert_eq!(record.sections.len(), 2);
        let recs = record.section("recommendations").unwrap();
        assert_eq!(recs.items[0].text, "No specific recommendations identified");
        assert!(recs.items[0].is_synthetic());
        assert!(record.is_low_confidence());
    }

    #[test]
    fn test_numbered_heading_fills_required_section() {
        let raw = "## 1. Key Insights\n1. Demand is rising\n\n## 2. Recommendations\n1. Expand the pilot";
        let record = parse(raw, &profile().required());
        let titles: Vec<_> = record.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Key Insights", "Recommendations"]);
        assert_eq!(record.section("key_insights").unwrap().items[0].text, "Demand is rising");
        assert!(!record.is_low_confidence());
    }

    #[test]
    fn test_parenthetical_heading_fills_required_section() {
        let p = ParserProfile::new()
            .with_sections(&["Short-term Actions", "Long-term Actions"])
            .required();
        let raw = "Short-term Actions (0-1 year):\n- Pilot two depots\nLong-term Actions (3-5 years):\n- Own the grid interface";
        let record = parse(raw, &p);
        assert_eq!(record.tier, ParseTier::Strict);
        assert_eq!(record.sections.len(), 2);
        assert_eq!(record.section("short_term_actions").unwrap().items[0].text, "Pilot two depots");
        assert_eq!(record.section("Long-term Actions").unwrap().items[0].text, "Own the grid interface");
        assert!(!record.is_low_confidence());
    }

    #[test]
    fn test_blank_field_name_does_not_stall() {
        let record = parse("- Build hubs", &ParserProfile::new().with_fields(&[""]));
        assert_eq!(record.tier, ParseTier::Loose);
        assert_eq!(record.items().next().map(|i| i.text.as_str()), Some("Build hubs"));
    }

    #[test]
    fn test_required_not_applied_when_not_marked() {
        let raw = "## Key Insights\n1. Demand is shifting online";
        let record = parse(raw, &profile());
        assert_eq!(record.sections.len(), 1);
        assert!(!record.is_low_confidence());
    }

    #[test]
    fn test_first_success_order() {
        fn never(_: &str, _: &ParserProfile) -> Option<StructuredRecord> {
            None
        }
        fn always(_: &str, _: &ParserProfile) -> Option<StructuredRecord> {
            Some(StructuredRecord::new(ParseTier::Loose))
        }
        let p = ParserProfile::new();
        let declined: [Tier; 1] = [never];
        let tiers: [Tier; 2] = [never, always];
        assert!(first_success("x", &p, &declined).is_none());
        assert_eq!(first_success("x", &p, &tiers).map(|r| r.tier), Some(ParseTier::Loose));
    }

    #[test]
    fn test_profile_matching_ignores_case_and_punctuation() {
        let p = ParserProfile::new().with_fields(&["Time Frame"]);
        assert!(p.is_known_field("time-frame"));
        assert!(p.is_known_field("**Time Frame**"));
        assert!(!p.is_known_field("Time"));
        assert!(!p.is_known_field(""));
    }
}
