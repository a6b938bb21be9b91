//! Loose tier: heuristic re-segmentation for replies that drifted from the
//! requested convention.
//!
//! Text is walked paragraph by paragraph. Heading-like keywords are looked
//! for anywhere in a short line, list markers are accepted in more shapes
//! (`1 - x`, `(2) y`), and labels of known fields are split off wherever
//! they occur.

use crate::output_parser::assemble::Assembler;
use crate::output_parser::extract::{clean_title, heading, list_line, split_fields, strip_emphasis};
use crate::output_parser::ParserProfile;
use crate::record::{ParseTier, StructuredRecord};
use regex::Regex;
use std::sync::LazyLock;

/// Title of the section opened for items that appear before any heading.
pub const DEFAULT_SECTION_TITLE: &str = "Overview";
/// Title of the section holding prose that trails a list.
pub const NOTES_SECTION_TITLE: &str = "Additional Notes";

/// Words that mark a line as a heading when it is short enough.
const HEADING_KEYWORDS: &[&str] = &[
    "summary",
    "overview",
    "recommendation",
    "insight",
    "risk",
    "opportunit",
    "action",
    "trend",
    "scenario",
    "finding",
    "conclusion",
    "key point",
    "next step",
    "milestone",
    "challenge",
    "implication",
    "analysis",
];

const MAX_HEADING_CHARS: usize = 80;
const MAX_HEADING_WORDS: usize = 8;

static LOOSE_ORDINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)\(?\d{1,3}\s*[):\-\x{2013}]\s+(.*)$").expect("valid loose ordinal regex")
});

/// Parse `text` heuristically.
///
/// Returns `None` when no item could be identified at all.
pub fn parse_loose(text: &str, profile: &ParserProfile) -> Option<StructuredRecord> {
    let mut asm = Assembler::new(ParseTier::Loose);

    for paragraph in paragraphs(text) {
        for (idx, line) in paragraph.iter().enumerate() {
            if let Some((indent, content)) = loose_list_line(line) {
                ensure_section(&mut asm);
                asm.list_entry(indent, split_fields(content, profile, true), profile);
                continue;
            }
            if let Some((title, summary)) = loose_heading(line, profile, asm.section_has_items()) {
                asm.open_section(title, summary);
                continue;
            }

            let trimmed = line.trim();
            let parsed = split_fields(trimmed, profile, true);
            if parsed.text.is_empty() && !parsed.fields.is_empty() {
                ensure_section(&mut asm);
                asm.attach_fields(parsed.fields);
            } else if idx == 0 && asm.section_has_items() {
                // Prose opening a paragraph after a list starts a new section.
                if looks_like_title(trimmed) {
                    asm.open_section(clean_title(trimmed), None);
                } else {
                    asm.open_section(NOTES_SECTION_TITLE, None);
                    asm.append_summary(&strip_emphasis(trimmed));
                }
            } else {
                ensure_section(&mut asm);
                asm.continuation(&strip_emphasis(trimmed));
            }
        }
    }

    asm.finish()
}

fn ensure_section(asm: &mut Assembler) {
    if !asm.has_section() {
        asm.open_section(DEFAULT_SECTION_TITLE, None);
    }
}

/// Non-blank lines grouped by blank-line separation.
fn paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut out: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn loose_list_line(line: &str) -> Option<(usize, &str)> {
    if let Some(list) = list_line(line) {
        return Some((list.indent, list.content));
    }
    let caps = LOOSE_ORDINAL.captures(line)?;
    let indent = caps.get(1).map_or(0, |m| m.as_str().chars().count());
    let content = caps.get(2)?.as_str().trim();
    Some((indent, content))
}

/// A heading under the strict rules, or a short line carrying a heading
/// keyword. For `Keyword...: rest`, `rest` becomes the section summary.
fn loose_heading(line: &str, profile: &ParserProfile, item_open: bool) -> Option<(String, Option<String>)> {
    if let Some(title) = heading(line, profile, item_open) {
        return Some((title, None));
    }

    let cleaned = clean_title(line);
    let (head, rest) = match cleaned.split_once(':') {
        Some((head, rest)) => (head.trim(), Some(rest.trim())),
        None => (cleaned.as_str(), None),
    };
    if head.is_empty() || profile.is_known_field(head) {
        return None;
    }
    if rest.is_none() && head.ends_with(['.', '!', '?']) {
        return None;
    }
    if head.chars().count() > MAX_HEADING_CHARS || head.split_whitespace().count() > MAX_HEADING_WORDS {
        return None;
    }

    let lower = head.to_lowercase();
    let keyword = HEADING_KEYWORDS.iter().any(|k| contains_word_start(&lower, k))
        || profile
            .sections()
            .any(|s| contains_word_start(&lower, &s.to_lowercase()));
    if !keyword {
        return None;
    }
    let summary = rest.filter(|r| !r.is_empty()).map(str::to_string);
    let title = profile.canonical_section(head).unwrap_or(head);
    Some((title.to_string(), summary))
}

/// Short, unpunctuated prose that reads like a title.
fn looks_like_title(text: &str) -> bool {
    let cleaned = clean_title(text);
    !cleaned.is_empty()
        && cleaned.chars().count() <= MAX_HEADING_CHARS / 2
        && cleaned.split_whitespace().count() <= MAX_HEADING_WORDS / 2 + 2
        && !cleaned.ends_with(['.', '!', '?', ',', ';'])
}

/// `needle` occurs in `haystack` starting at a word boundary.
fn contains_word_start(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}
