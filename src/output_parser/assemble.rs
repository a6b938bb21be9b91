//! Incremental record construction shared by the strict and loose tiers.
//!
//! The assembler tracks the section and item currently open and the field
//! a continuation line should extend, so tiers only decide what a line *is*.

use crate::output_parser::extract::{Field, Fields};
use crate::output_parser::ParserProfile;
use crate::record::{Item, ParseTier, Section, StructuredRecord};

/// Attribute collecting indented sub-bullets of an item.
pub const DETAILS_ATTR: &str = "details";

/// The field a continuation line appends to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    None,
    Summary,
    ItemText,
    ItemField(String),
    SectionField(String),
}

#[derive(Debug)]
pub(crate) struct Assembler {
    tier: ParseTier,
    sections: Vec<Section>,
    cursor: Cursor,
    /// Indentation of the last top-level item in the open section.
    item_indent: usize,
}

impl Assembler {
    pub fn new(tier: ParseTier) -> Self {
        Self {
            tier,
            sections: Vec::new(),
            cursor: Cursor::None,
            item_indent: 0,
        }
    }

    pub fn has_section(&self) -> bool {
        !self.sections.is_empty()
    }

    /// Whether the open section already holds an item.
    pub fn section_has_items(&self) -> bool {
        self.sections.last().is_some_and(|s| !s.items.is_empty())
    }

    pub fn open_section(&mut self, title: impl Into<String>, summary: Option<String>) {
        let mut section = Section::new(title);
        if let Some(summary) = summary {
            section.summary = summary;
        }
        self.sections.push(section);
        self.cursor = Cursor::Summary;
        self.item_indent = 0;
    }

    /// Handle a list-marker line already split into text and fields.
    ///
    /// A line deeper than the current item becomes a detail of it; a line
    /// holding only labels becomes sub-fields of the current item; anything
    /// else opens a new item.
    pub fn list_entry(&mut self, indent: usize, parsed: Fields, profile: &ParserProfile) {
        let Fields { text, mut fields } = parsed;
        let nested = self.section_has_items() && indent > self.item_indent;

        if text.is_empty() {
            if fields.is_empty() {
                return;
            }
            let known_first = profile.is_known_field(&fields[0].label);
            if self.section_has_items() && (nested || known_first) {
                self.attach_fields(fields);
                return;
            }
            if !known_first {
                // `**Market Entry:** enter the EU` is an item, not a field.
                let lead = fields.remove(0);
                let text = if lead.value.is_empty() {
                    lead.label
                } else {
                    format!("{}: {}", lead.label, lead.value)
                };
                self.push_item(indent, text, fields);
                return;
            }
            self.attach_fields(fields);
            return;
        }

        if nested {
            self.add_detail(&text);
            if !fields.is_empty() {
                self.attach_fields(fields);
            }
            return;
        }

        self.push_item(indent, text, fields);
    }

    fn push_item(&mut self, indent: usize, text: String, fields: Vec<Field>) {
        let Some(section) = self.sections.last_mut() else {
            return;
        };
        let mut item = Item::new(text);
        self.cursor = Cursor::ItemText;
        for field in fields {
            self.cursor = Cursor::ItemField(field.key.clone());
            item.attributes.insert(field.key, field.value);
        }
        section.items.push(item);
        self.item_indent = indent;
    }

    fn add_detail(&mut self, text: &str) {
        let Some(item) = self.sections.last_mut().and_then(|s| s.items.last_mut()) else {
            return;
        };
        let details = item.attributes.entry(DETAILS_ATTR.to_string()).or_default();
        if !details.is_empty() {
            details.push_str("; ");
        }
        details.push_str(text);
        self.cursor = Cursor::ItemField(DETAILS_ATTR.to_string());
    }

    /// Attach labeled fields to the current item, or to the open section when
    /// it has no item yet.
    pub fn attach_fields(&mut self, fields: Vec<Field>) {
        let Some(section) = self.sections.last_mut() else {
            return;
        };
        match section.items.last_mut() {
            Some(item) => {
                for field in fields {
                    self.cursor = Cursor::ItemField(field.key.clone());
                    item.attributes.insert(field.key, field.value);
                }
            }
            None => {
                for field in fields {
                    self.cursor = Cursor::SectionField(field.key.clone());
                    section.attributes.insert(field.key, field.value);
                }
            }
        }
    }

    pub fn append_summary(&mut self, text: &str) {
        if let Some(section) = self.sections.last_mut() {
            join(&mut section.summary, text);
            self.cursor = Cursor::Summary;
        }
    }

    /// Append `text` with one separating space to the most recently opened field.
    pub fn continuation(&mut self, text: &str) {
        let Some(section) = self.sections.last_mut() else {
            return;
        };
        let text = text.trim();
        match &self.cursor {
            Cursor::None | Cursor::Summary => join(&mut section.summary, text),
            Cursor::ItemText => {
                if let Some(item) = section.items.last_mut() {
                    join(&mut item.text, text);
                }
            }
            Cursor::ItemField(key) => {
                if let Some(item) = section.items.last_mut() {
                    join(item.attributes.entry(key.clone()).or_default(), text);
                }
            }
            Cursor::SectionField(key) => {
                join(section.attributes.entry(key.clone()).or_default(), text);
            }
        }
    }

    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// The record, or `None` when no item was extracted.
    pub fn finish(self) -> Option<StructuredRecord> {
        if self.item_count() == 0 {
            return None;
        }
        let sections = self
            .sections
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        Some(StructuredRecord {
            sections,
            tier: self.tier,
        })
    }
}

fn join(target: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}
