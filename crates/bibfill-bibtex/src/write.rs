//! Deterministic BibTeX serialization.
//!
//! Entries print with a fixed field order (author and title lead, the
//! rest alphabetical), tab indentation, braced values, and a trailing
//! comma, so identical inputs always produce byte-identical output.
//! Verbatim items (comments, macros, unparsed entries) pass through
//! untouched.

use crate::entry::Entry;
use crate::read::{Bibliography, Item};

/// Fields printed before the alphabetical remainder.
const DISPLAY_ORDER: &[&str] = &["author", "title"];

pub fn write_bibliography(bib: &Bibliography) -> String {
    let blocks: Vec<String> = bib
        .items
        .iter()
        .map(|item| match item {
            Item::Entry(entry) => write_entry(entry),
            Item::Verbatim(text) => text.trim_end().to_string(),
        })
        .collect();
    let mut out = blocks.join("\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

pub fn write_entry(entry: &Entry) -> String {
    let mut out = format!("@{}{{{},\n", entry.entry_type, entry.key);
    for name in ordered_field_names(entry) {
        if let Some(value) = entry.get(name) {
            out.push_str(&format!("\t{} = {{{}}},\n", name, value));
        }
    }
    out.push('}');
    out
}

fn ordered_field_names(entry: &Entry) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::with_capacity(entry.non_empty_count());
    for lead in DISPLAY_ORDER {
        if entry.has(lead) {
            names.push(lead);
        }
    }
    let mut rest: Vec<&str> = entry
        .field_names()
        .filter(|n| !DISPLAY_ORDER.contains(n))
        .collect();
    rest.sort_unstable();
    names.extend(rest);
    names
}
