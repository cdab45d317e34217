//! Combining an original entry with accepted candidates.
//!
//! The original is the source of truth: scalar fields it already carries
//! are never overwritten unless the run forces it. Absent scalars are
//! filled by the first candidate in adapter-priority order; list fields
//! take the order-preserving union with the original's ordering intact.

use std::collections::BTreeSet;

use bibfill_bibtex::Entry;
use bibfill_bibtex::field::{combine_raw, is_list_field, is_recognized, normalize_raw};

use crate::lookup::Candidate;

/// One field written during a merge, for reporting.
#[derive(Debug, Clone)]
pub struct FilledField {
    pub name: String,
    pub value: String,
    pub source: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    pub force_overwrite: bool,
    pub only_complete: Option<BTreeSet<String>>,
    pub dont_complete: BTreeSet<String>,
    pub remove_fields: BTreeSet<String>,
}

impl MergePolicy {
    fn completable(&self, name: &str) -> bool {
        if self.dont_complete.contains(name) {
            return false;
        }
        match &self.only_complete {
            Some(only) => only.contains(name),
            None => true,
        }
    }
}

/// Merge candidates into a copy of `original`, in the given (priority)
/// order. Returns the merged entry and the list of writes performed.
pub fn merge_entry(
    original: &Entry,
    candidates: &[&Candidate],
    policy: &MergePolicy,
) -> (Entry, Vec<FilledField>) {
    let mut merged = original.clone();
    let mut filled: Vec<FilledField> = Vec::new();
    // Scalars overwritten once keep the highest-priority value.
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for candidate in candidates {
        for (name, value) in candidate.entry.fields() {
            if !is_recognized(name) || !policy.completable(name) {
                continue;
            }
            match merged.get(name) {
                None => {
                    merged.set(name, value);
                    touched.insert(name.to_string());
                    filled.push(FilledField {
                        name: name.to_string(),
                        value: merged.get(name).unwrap_or(value).to_string(),
                        source: candidate.adapter,
                    });
                }
                Some(existing) => {
                    if is_list_field(name) {
                        let existing = existing.to_string();
                        if let Some(union) = combine_raw(name, &existing, value)
                            && normalize_raw(name, &union) != normalize_raw(name, &existing)
                        {
                            merged.set_verbatim(name, &union);
                            filled.push(FilledField {
                                name: name.to_string(),
                                value: union,
                                source: candidate.adapter,
                            });
                        }
                    } else if policy.force_overwrite && !touched.contains(name) {
                        let existing = existing.to_string();
                        merged.set(name, value);
                        touched.insert(name.to_string());
                        if merged.get(name) != Some(existing.as_str()) {
                            filled.push(FilledField {
                                name: name.to_string(),
                                value: merged.get(name).unwrap_or(value).to_string(),
                                source: candidate.adapter,
                            });
                        }
                    }
                }
            }
        }
    }

    for name in &policy.remove_fields {
        merged.remove(name);
    }

    (merged, filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[(&str, &str)]) -> Entry {
        let mut e = Entry::new("key", "article");
        for (name, value) in fields {
            e.set(name, value);
        }
        e
    }

    fn candidate(adapter: &'static str, fields: &[(&str, &str)]) -> Candidate {
        Candidate {
            entry: entry(fields),
            adapter,
            source_url: format!("https://{adapter}.example/q"),
            score: 999,
        }
    }

    #[test]
    fn absent_scalars_fill_by_priority() {
        let original = entry(&[("title", "A Paper")]);
        let first = candidate("crossref", &[("doi", "10.1000/1"), ("year", "2004")]);
        let second = candidate("dblp", &[("doi", "10.1000/2"), ("pages", "1-10")]);

        let (merged, filled) =
            merge_entry(&original, &[&first, &second], &MergePolicy::default());
        assert_eq!(merged.doi().as_deref(), Some("10.1000/1"));
        assert_eq!(merged.get("pages"), Some("1-10"));
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].source, "crossref");
    }

    #[test]
    fn present_scalars_are_kept_without_force() {
        let original = entry(&[("title", "A Paper"), ("year", "2003")]);
        let cand = candidate("crossref", &[("year", "2004")]);

        let (merged, filled) = merge_entry(&original, &[&cand], &MergePolicy::default());
        assert_eq!(merged.get("year"), Some("2003"));
        assert!(filled.is_empty());
    }

    #[test]
    fn force_overwrites_with_highest_priority_value() {
        let original = entry(&[("title", "A Paper"), ("year", "2003")]);
        let first = candidate("crossref", &[("year", "2004")]);
        let second = candidate("dblp", &[("year", "2005")]);

        let policy = MergePolicy {
            force_overwrite: true,
            ..Default::default()
        };
        let (merged, _) = merge_entry(&original, &[&first, &second], &policy);
        assert_eq!(merged.get("year"), Some("2004"));
    }

    #[test]
    fn list_fields_take_the_union_preserving_original_order() {
        let original = entry(&[("title", "A Paper"), ("keywords", "a, b, c")]);
        let cand = candidate("crossref", &[("keywords", "b, d")]);

        let (merged, filled) = merge_entry(&original, &[&cand], &MergePolicy::default());
        assert_eq!(merged.get("keywords"), Some("a, b, c, d"));
        assert_eq!(filled.len(), 1);
    }

    #[test]
    fn identical_lists_record_no_write() {
        let original = entry(&[("keywords", "a, b")]);
        let cand = candidate("crossref", &[("keywords", "a, b")]);
        let (_, filled) = merge_entry(&original, &[&cand], &MergePolicy::default());
        assert!(filled.is_empty());
    }

    #[test]
    fn dont_complete_and_only_complete_gate_writes() {
        let original = entry(&[("title", "A Paper")]);
        let cand = candidate("crossref", &[("doi", "10.1000/1"), ("year", "2004")]);

        let policy = MergePolicy {
            dont_complete: ["doi".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (merged, _) = merge_entry(&original, &[&cand], &policy);
        assert!(merged.doi().is_none());
        assert_eq!(merged.get("year"), Some("2004"));

        let policy = MergePolicy {
            only_complete: Some(["doi".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let (merged, _) = merge_entry(&original, &[&cand], &policy);
        assert!(merged.doi().is_some());
        assert!(merged.get("year").is_none());
    }

    #[test]
    fn remove_fields_apply_post_merge() {
        let original = entry(&[("title", "A Paper"), ("note", "draft")]);
        let cand = candidate("crossref", &[("note", "published")]);

        let policy = MergePolicy {
            remove_fields: ["note".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let (merged, _) = merge_entry(&original, &[&cand], &policy);
        assert!(merged.get("note").is_none());
    }

    #[test]
    fn unknown_candidate_fields_are_ignored() {
        let original = entry(&[("title", "A Paper")]);
        let mut weird = entry(&[]);
        weird.set("x-internal", "nope");
        let cand = Candidate {
            entry: weird,
            adapter: "crossref",
            source_url: String::new(),
            score: 999,
        };
        let (merged, filled) = merge_entry(&original, &[&cand], &MergePolicy::default());
        assert!(merged.get("x-internal").is_none());
        assert!(filled.is_empty());
    }

    #[test]
    fn merging_is_idempotent() {
        let original = entry(&[("title", "A Paper"), ("keywords", "a, b")]);
        let cand = candidate(
            "crossref",
            &[("doi", "10.1000/1"), ("keywords", "b, c"), ("year", "2004")],
        );
        let policy = MergePolicy::default();
        let (once, _) = merge_entry(&original, &[&cand], &policy);
        let (twice, filled) = merge_entry(&once, &[&cand], &policy);
        assert_eq!(
            once.fields().collect::<Vec<_>>(),
            twice.fields().collect::<Vec<_>>()
        );
        assert!(filled.is_empty());
    }
}
