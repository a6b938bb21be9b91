//! The generic record shape every stage parser normalizes into.
//!
//! A [`StructuredRecord`] is a list of [`Section`]s, each holding ordered
//! [`Item`]s with free-form string attributes (a priority, a time-horizon
//! label, a confidence level). Downstream stages traverse this one shape
//! instead of stage-specific structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute key set on placeholder content produced by the fallback tier.
pub const SYNTHETIC_ATTR: &str = "synthetic";

/// Which parsing tier produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    /// Marker-based parse of the documented convention.
    Strict,
    /// Heuristic paragraph/keyword parse.
    Loose,
    /// Placeholder record built when nothing else worked.
    Synthetic,
}

impl ParseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseTier::Strict => "strict",
            ParseTier::Loose => "loose",
            ParseTier::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a section: a ranked action, a trend, a milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Primary text of the item.
    pub text: String,
    /// Labeled sub-fields, keyed by normalized label (`"Time Frame"` -> `"time_frame"`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Item {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Whether this item is placeholder content rather than model output.
    pub fn is_synthetic(&self) -> bool {
        self.attribute(SYNTHETIC_ATTR) == Some("true")
    }

    /// A synthetic placeholder item.
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::new(text).with_attribute(SYNTHETIC_ATTR, "true")
    }
}

/// A titled group of items with an optional free-text summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub items: Vec<Item>,
    /// Labeled fields that appeared before the section's first item.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// A section carries nothing worth keeping.
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.items.is_empty() && self.attributes.is_empty()
    }

    /// Slug used for `{stage.section}` template lookups: `"Quick Wins"` -> `"quick_wins"`.
    pub fn slug(&self) -> String {
        slugify(&self.title)
    }
}

/// Parser output: an ordered tree of sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub sections: Vec<Section>,
    /// Tier that produced this record.
    pub tier: ParseTier,
}

impl StructuredRecord {
    pub fn new(tier: ParseTier) -> Self {
        Self {
            sections: Vec::new(),
            tier,
        }
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Total number of items across all sections.
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// True when the record came from the fallback tier or contains placeholder items.
    pub fn is_low_confidence(&self) -> bool {
        self.tier == ParseTier::Synthetic
            || self
                .sections
                .iter()
                .flat_map(|s| s.items.iter())
                .any(Item::is_synthetic)
    }

    /// Find a section by slug or by case-insensitive title.
    pub fn section(&self, key: &str) -> Option<&Section> {
        let wanted = slugify(key);
        self.sections.iter().find(|s| s.slug() == wanted)
    }

    /// Iterate over all items in section order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    /// Render as a human-readable markdown document.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str("## ");
            out.push_str(&section.title);
            out.push('\n');
            if !section.summary.is_empty() {
                out.push_str(&section.summary);
                out.push('\n');
            }
            for (key, value) in &section.attributes {
                out.push_str(&format!("**{}:** {}\n", label_from_key(key), value));
            }
            for (idx, item) in section.items.iter().enumerate() {
                out.push_str(&format!("{}. {}", idx + 1, item.text));
                for (key, value) in &item.attributes {
                    if key == SYNTHETIC_ATTR {
                        continue;
                    }
                    out.push_str(&format!(" -- **{}:** {}", label_from_key(key), value));
                }
                if item.is_synthetic() {
                    out.push_str(" _(placeholder)_");
                }
                out.push('\n');
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    /// Render compactly for interpolation into a downstream prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&section.title);
            out.push_str(":\n");
            if !section.summary.is_empty() {
                out.push_str(&section.summary);
                out.push('\n');
            }
            out.push_str(&bullet_list(&section.items));
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// Render items as `- text (key: value)` lines, skipping synthetic markers.
pub fn bullet_list(items: &[Item]) -> String {
    items
        .iter()
        .map(|item| {
            let attrs: Vec<String> = item
                .attributes
                .iter()
                .filter(|(k, _)| k.as_str() != SYNTHETIC_ATTR)
                .map(|(k, v)| format!("{}: {}", label_from_key(k), v))
                .collect();
            if attrs.is_empty() {
                format!("- {}", item.text)
            } else {
                format!("- {} ({})", item.text, attrs.join("; "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize a heading or label into a lookup key.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

fn label_from_key(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StructuredRecord {
        StructuredRecord::new(ParseTier::Strict)
            .with_section(
                Section::new("Quick Wins")
                    .with_item(Item::new("Pilot charging hubs").with_attribute("priority", "High"))
                    .with_item(Item::new("Publish tariff guide")),
            )
            .with_section(Section::new("Risks").with_summary("Supply chain exposure."))
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Quick Wins"), "quick_wins");
        assert_eq!(slugify("Short-term Actions (0-1 year)"), "short_term_actions_0_1_year");
        assert_eq!(slugify("  Time Frame: "), "time_frame");
    }

    #[test]
    fn test_section_lookup_by_title_or_slug() {
        let record = sample();
        assert!(record.section("quick_wins").is_some());
        assert!(record.section("Quick Wins").is_some());
        assert!(record.section("missing").is_none());
    }

    #[test]
    fn test_item_count_and_confidence() {
        let record = sample();
        assert_eq!(record.item_count(), 2);
        assert!(!record.is_low_confidence());

        let flagged = record.with_section(Section::new("Gaps").with_item(Item::placeholder("n/a")));
        assert!(flagged.is_low_confidence());
    }

    #[test]
    fn test_markdown_rendering() {
        let md = sample().to_markdown();
        assert!(md.starts_with("## Quick Wins\n1. Pilot charging hubs -- **Priority:** High"));
        assert!(md.contains("2. Publish tariff guide"));
        assert!(md.contains("## Risks\nSupply chain exposure."));
    }

    #[test]
    fn test_prompt_text_rendering() {
        let text = sample().to_prompt_text();
        assert!(text.contains("Quick Wins:\n- Pilot charging hubs (Priority: High)\n- Publish tariff guide"));
    }

    #[test]
    fn test_placeholder_hidden_from_bullets() {
        let list = bullet_list(&[Item::placeholder("Review manually")]);
        assert_eq!(list, "- Review manually");
    }
}
