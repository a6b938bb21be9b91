//! Strict tier: marker-based parse of the documented response convention.
//!
//! ```text
//! ## Section Title
//! Optional summary line(s)
//! 1. **Primary text** - detail -- **Priority:** High
//!    - nested detail
//!    continuation of the last opened field
//! **Impact:** Medium            <- sub-field of the item above
//! ```
//!
//! Text before the first heading is ignored. Blank lines never close an item.

use crate::output_parser::assemble::Assembler;
use crate::output_parser::extract::{heading, list_line, split_fields};
use crate::output_parser::ParserProfile;
use crate::record::{ParseTier, StructuredRecord};

/// Parse `text` under the strict convention.
///
/// Returns `None` unless at least one section with at least one item was found.
pub fn parse_strict(text: &str, profile: &ParserProfile) -> Option<StructuredRecord> {
    let mut asm = Assembler::new(ParseTier::Strict);

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(title) = heading(line, profile, asm.section_has_items()) {
            asm.open_section(title, None);
            continue;
        }
        if !asm.has_section() {
            continue;
        }
        if let Some(list) = list_line(line) {
            asm.list_entry(list.indent, split_fields(list.content, profile, false), profile);
            continue;
        }
        let parsed = split_fields(line.trim(), profile, false);
        if parsed.text.is_empty() && !parsed.fields.is_empty() {
            asm.attach_fields(parsed.fields);
        } else {
            asm.continuation(line);
        }
    }

    asm.finish()
}
