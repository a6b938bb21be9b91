//! Shared extraction primitives for LLM output parsing.
//!
//! This is the load-bearing module: every tier calls into these functions
//! for preprocessing and for recognizing list markers, headings and labeled
//! fields on a single line.

use crate::output_parser::ParserProfile;
use crate::record::slugify;
use regex::Regex;
use std::sync::LazyLock;

static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)\d{1,3}[.)]\s+(.*)$").expect("valid ordinal regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*+\x{2022}]\s+(.*)$").expect("valid bullet regex"));
static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)\s*#*\s*$").expect("valid heading regex"));
static BOLD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\*\*([^*]+)\*\*\s*:?\s*$").expect("valid bold line regex"));
static COLON_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9][^:]{0,79}):\s*$").expect("valid colon heading regex"));
// `**Label:** value` or `**Label**: value`
static BOLD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*([^*:\n]{1,40}?)\s*:\s*\*\*\s*|\*\*([^*:\n]{1,40}?)\*\*\s*:\s*")
        .expect("valid bold label regex")
});
static TITLE_ORDINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{1,3}|[IVXivx]{1,4})[.)]\s+").expect("valid title ordinal regex")
});
static TRAILING_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()]*\)\s*$").expect("valid trailing parenthetical regex"));
static PLAIN_LABEL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 /&-]{0,39}?)\s*:\s*").expect("valid plain label regex")
});

/// Common boilerplate openers that LLMs put before the actual answer.
const SIMPLE_PREFIXES: &[&str] = &[
    "Sure! ",
    "Sure, ",
    "Sure.\n",
    "Of course! ",
    "Of course, ",
    "Of course.\n",
    "Certainly! ",
    "Certainly, ",
    "Certainly.\n",
    "Absolutely! ",
    "Absolutely, ",
];

/// Opener lines dropped when they end with a colon ("Here is the analysis:").
const LINE_PREFIXES: &[&str] = &["Here's ", "Here is ", "Below is "];

/// Full preprocessing applied to every response before any tier runs.
///
/// Strips `<think>`/`<thinking>` blocks, unwraps a code fence enclosing the
/// whole response, drops boilerplate openers, then trims.
pub fn preprocess(text: &str) -> String {
    let stripped = strip_think_tags(text);
    let unfenced = unwrap_fence(stripped.trim());
    strip_boilerplate(unfenced).trim().to_string()
}

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
///
/// # Examples
///
/// ```
/// use strategy_pipeline::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            // No closing tag: strip to the end.
            result.truncate(start);
            break;
        }
    }
    result
}

/// If the entire response is one markdown code block, return its content.
///
/// ```
/// use strategy_pipeline::output_parser::extract::unwrap_fence;
///
/// assert_eq!(unwrap_fence("```markdown\n## A\n1. b\n```"), "## A\n1. b");
/// assert_eq!(unwrap_fence("text ```x``` text"), "text ```x``` text");
/// ```
pub fn unwrap_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return text;
    }
    let Some(line_end) = trimmed.find('\n') else {
        return text;
    };
    let body_end = trimmed.len() - 3;
    if line_end + 1 > body_end {
        return text;
    }
    let body = &trimmed[line_end + 1..body_end];
    if body.contains("```") {
        // Several blocks, not one enclosing fence.
        return text;
    }
    body.trim()
}

/// Drop a conversational opener such as `"Sure! "` or `"Here is the analysis:\n"`.
pub fn strip_boilerplate(text: &str) -> &str {
    for prefix in SIMPLE_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            return rest;
        }
    }
    for prefix in LINE_PREFIXES {
        if text.starts_with(prefix) {
            let (first, rest) = text.split_once('\n').unwrap_or((text, ""));
            if first.trim_end().ends_with(':') {
                return rest;
            }
        }
    }
    text
}

/// Remove bold/underline emphasis markers.
pub(crate) fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace("__", "")
}

/// Trim whitespace and dangling separators (`--`, `-`, `|`, `;`, `,`) from the end.
pub(crate) fn trim_separators(text: &str) -> &str {
    text.trim()
        .trim_end_matches(|c: char| {
            c.is_whitespace() || matches!(c, '-' | '\u{2013}' | '\u{2014}' | '|' | ';' | ',')
        })
        .trim()
}

/// Trim brackets left unmatched at either end, e.g. where a label was cut
/// out of `Build hubs (impact: high, priority: low)`.
pub(crate) fn trim_unbalanced(text: &str) -> &str {
    let mut s = trim_separators(text);
    loop {
        let before = s.len();
        for (open, close) in [('(', ')'), ('[', ']')] {
            let opens = s.matches(open).count();
            let closes = s.matches(close).count();
            if s.ends_with(open) || (s.ends_with(close) && closes > opens) {
                s = &s[..s.len() - 1];
            } else if s.starts_with(close) || (s.starts_with(open) && opens > closes) {
                s = &s[1..];
            }
            s = trim_separators(s);
        }
        if s.len() == before {
            return s;
        }
    }
}

/// A line carrying an ordinal (`1.`, `2)`) or bullet (`-`, `*`, `+`, `•`) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListLine<'a> {
    /// Leading whitespace width in characters.
    pub indent: usize,
    pub ordinal: bool,
    /// Text after the marker.
    pub content: &'a str,
}

pub(crate) fn list_line(line: &str) -> Option<ListLine<'_>> {
    let (caps, ordinal) = match ORDINAL.captures(line) {
        Some(caps) => (caps, true),
        None => (BULLET.captures(line)?, false),
    };
    let indent = caps.get(1).map_or(0, |m| m.as_str().chars().count());
    let content = caps.get(2).map_or("", |m| m.as_str()).trim();
    Some(ListLine {
        indent,
        ordinal,
        content,
    })
}

/// Recognize a section heading under the documented convention.
///
/// Headings are `#` lines, whole-line `**Title**`, a `Title:` line with
/// nothing after the colon, or a bare line naming one of the profile's
/// expected sections. While an item is open, a `Title:` line only counts
/// when it names an expected section; otherwise it continues the item.
/// Lines naming a known field are never headings.
///
/// Titles referring to an expected section (`1. Key Insights`,
/// `Short-term Actions (0-1 year)`) come back as the profile's name.
pub(crate) fn heading(line: &str, profile: &ParserProfile, item_open: bool) -> Option<String> {
    let marked = if let Some(caps) = MD_HEADING.captures(line) {
        caps.get(1)
    } else {
        BOLD_LINE.captures(line).and_then(|caps| caps.get(1))
    };
    if let Some(candidate) = marked {
        return section_title(candidate.as_str(), profile);
    }
    if list_line(line).is_some() {
        return None;
    }
    if let Some(caps) = COLON_HEADING.captures(line) {
        let candidate = caps.get(1)?.as_str();
        if let Some(name) = profile.exact_section(candidate) {
            return Some(name.to_string());
        }
        return if item_open { None } else { section_title(candidate, profile) };
    }
    profile.exact_section(&clean_title(line)).map(str::to_string)
}

fn section_title(candidate: &str, profile: &ParserProfile) -> Option<String> {
    let title = clean_title(candidate);
    if title.is_empty() || profile.is_known_field(&title) {
        return None;
    }
    if let Some(name) = profile.canonical_section(&title) {
        return Some(name.to_string());
    }
    match strip_title_ordinal(&title) {
        "" => Some(title),
        rest => Some(rest.to_string()),
    }
}

/// Drop a leading `1.`, `2)` or `IV.` from a title.
pub(crate) fn strip_title_ordinal(title: &str) -> &str {
    let title = title.trim();
    TITLE_ORDINAL.find(title).map_or(title, |m| title[m.end()..].trim())
}

/// A title without its leading ordinal and trailing parenthetical.
pub(crate) fn strip_title_decorations(title: &str) -> String {
    let cleaned = clean_title(title);
    let bare = strip_title_ordinal(&cleaned);
    TRAILING_PAREN.replace(bare, "").trim().to_string()
}

/// Strip emphasis, heading hashes and a trailing colon from a title.
pub(crate) fn clean_title(text: &str) -> String {
    strip_emphasis(text)
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// One labeled sub-field found on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field {
    /// Label as written, emphasis removed.
    pub label: String,
    /// Normalized attribute key.
    pub key: String,
    pub value: String,
}

/// A line split into its primary text and labeled sub-fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Fields {
    pub text: String,
    pub fields: Vec<Field>,
}

struct LabelSpan {
    start: usize,
    end: usize,
    label: String,
}

/// Split `content` into primary text and labeled sub-fields.
///
/// Bold labels (`**Priority:** High`) are recognized anywhere. Plain labels
/// (`Priority: High`) are recognized only for the profile's known fields:
/// at the start of the line, or anywhere when `plain_anywhere` is set.
pub(crate) fn split_fields(content: &str, profile: &ParserProfile, plain_anywhere: bool) -> Fields {
    let mut spans: Vec<LabelSpan> = BOLD_LABEL
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1).or_else(|| caps.get(2))?.as_str().trim().to_string();
            Some(LabelSpan {
                start: whole.start(),
                end: whole.end(),
                label,
            })
        })
        .collect();

    if plain_anywhere {
        spans.extend(plain_field_spans(content, profile, &spans));
    } else if spans.first().map_or(true, |s| s.start > 0) {
        if let Some(caps) = PLAIN_LABEL_START.captures(content) {
            if let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) {
                if profile.is_known_field(label.as_str()) {
                    spans.push(LabelSpan {
                        start: whole.start(),
                        end: whole.end(),
                        label: label.as_str().trim().to_string(),
                    });
                }
            }
        }
    }
    spans.sort_by_key(|s| s.start);

    let text_end = spans.first().map_or(content.len(), |s| s.start);
    let text = trim_unbalanced(&strip_emphasis(&content[..text_end])).to_string();

    let fields = spans
        .iter()
        .enumerate()
        .filter_map(|(i, span)| {
            let value_end = spans.get(i + 1).map_or(content.len(), |next| next.start);
            let value = trim_unbalanced(&strip_emphasis(&content[span.end..value_end])).to_string();
            let key = slugify(&span.label);
            (!key.is_empty()).then(|| Field {
                label: strip_emphasis(&span.label),
                key,
                value,
            })
        })
        .collect();

    Fields { text, fields }
}

/// Plain `Field:` occurrences of known fields, at word boundaries, not
/// overlapping already-found spans.
fn plain_field_spans(content: &str, profile: &ParserProfile, taken: &[LabelSpan]) -> Vec<LabelSpan> {
    let lower = content.to_ascii_lowercase();
    let mut found: Vec<LabelSpan> = Vec::new();
    for field in profile.fields() {
        let needle = field.trim().to_ascii_lowercase();
        if needle.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(offset) = lower[from..].find(&needle) {
            let start = from + offset;
            let after = start + needle.len();
            from = after;

            let boundary = lower[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
            let rest = &lower[after..];
            let colon = rest.len() - rest.trim_start().len();
            if !boundary || !rest[colon..].starts_with(':') {
                continue;
            }
            let value_start = after + colon + 1;
            let end = value_start + (lower[value_start..].len() - lower[value_start..].trim_start().len());

            let overlaps = taken
                .iter()
                .chain(found.iter())
                .any(|s| start < s.end && s.start < end);
            if !overlaps {
                found.push(LabelSpan {
                    start,
                    end,
                    label: content[start..after].to_string(),
                });
            }
        }
    }
    found
}
