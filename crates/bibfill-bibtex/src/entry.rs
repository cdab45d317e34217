//! A structured view over a BibTeX entry's raw field map.
//!
//! Field names are lowercase and unique; stored values are non-empty.
//! Recognized fields are normalized on write; unknown fields pass through
//! verbatim and are never compared or merged. The citation key is never
//! mutated here.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::author::Author;
use crate::field::{self, is_recognized};
use crate::normalize::normalize_doi;

/// Where an entry came from, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceId {
    pub file: Option<String>,
    /// 0-based position within the source file.
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub entry_type: String,
    pub source: SourceId,
    fields: IndexMap<String, String>,
}

impl Entry {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into().to_lowercase(),
            source: SourceId::default(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_source(mut self, file: Option<&str>, index: usize) -> Self {
        self.source = SourceId {
            file: file.map(str::to_string),
            index,
        };
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, normalizing recognized values. An empty value is a
    /// no-op; a value that fails to normalize is stored raw (invalid
    /// values are preserved, not dropped).
    pub fn set(&mut self, name: &str, value: &str) {
        let name = name.to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let stored = if is_recognized(&name) {
            field::normalize_raw(&name, value).unwrap_or_else(|| value.to_string())
        } else {
            value.to_string()
        };
        if !stored.is_empty() {
            self.fields.insert(name, stored);
        }
    }

    /// Set a field without normalization (used for verbatim passthrough).
    pub fn set_verbatim(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.fields.insert(name.to_lowercase(), value.to_string());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.shift_remove(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn non_empty_count(&self) -> usize {
        self.fields.len()
    }

    /// The subset of `targets` this entry does not yet carry.
    pub fn fields_missing(&self, targets: &BTreeSet<String>) -> BTreeSet<String> {
        targets
            .iter()
            .filter(|name| !self.fields.contains_key(*name))
            .cloned()
            .collect()
    }

    // ── Typed accessors ─────────────────────────────────────────────────

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    pub fn authors(&self) -> Vec<Author> {
        self.get("author").map(Author::from_namelist).unwrap_or_default()
    }

    pub fn editors(&self) -> Vec<Author> {
        self.get("editor").map(Author::from_namelist).unwrap_or_default()
    }

    /// Canonical DOI, when the field is present and valid.
    pub fn doi(&self) -> Option<String> {
        self.get("doi").and_then(normalize_doi)
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url")
    }

    pub fn year(&self) -> Option<i32> {
        self.get("year").and_then(|y| y.trim().parse().ok())
    }

    pub fn month(&self) -> Option<&str> {
        self.get("month")
    }

    pub fn pages(&self) -> Option<&str> {
        self.get("pages")
    }

    pub fn journal(&self) -> Option<&str> {
        self.get("journal")
    }

    pub fn booktitle(&self) -> Option<&str> {
        self.get("booktitle")
    }

    pub fn isbn(&self) -> Option<&str> {
        self.get("isbn")
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.get("abstract")
    }

    pub fn keywords(&self) -> Vec<String> {
        self.get("keywords")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set authors from the parsed form, writing the normalized raw value.
    pub fn set_authors(&mut self, authors: &[Author]) {
        if !authors.is_empty() {
            self.set_verbatim("author", &Author::namelist_to_bibtex(authors));
        }
    }
}
