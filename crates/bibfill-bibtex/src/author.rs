//! Author names: parsing from BibTeX name lists and component-aware
//! comparison (initials match full names in the corresponding position).

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::normalize::normalize_str_weak;

/// Common surname prefixes (case-insensitive).
static SURNAME_PREFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "van", "von", "de", "del", "della", "di", "da", "al", "el", "la", "le", "ben", "ibn",
        "mac", "mc",
    ]
    .into_iter()
    .collect()
});

/// A single author, split into last name and optional first names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub last_name: String,
    pub first_names: Option<String>,
}

impl Author {
    pub fn new(last_name: impl Into<String>, first_names: Option<&str>) -> Self {
        Self {
            last_name: last_name.into(),
            first_names: first_names.map(str::to_string),
        }
    }

    /// Parse a single name written either "Last, First" or "First Last".
    ///
    /// Trailing numeric disambiguators ("Peter Müller 0001") are stripped.
    /// Returns `None` for empty input.
    pub fn parse(name: &str) -> Option<Author> {
        let name = strip_disambiguator(name.trim());
        if name.is_empty() {
            return None;
        }

        if let Some((last, first)) = name.split_once(',') {
            let last = last.trim();
            let first = first.trim();
            if last.is_empty() {
                return None;
            }
            let first = (!first.is_empty()).then_some(first);
            return Some(Author::new(last, first));
        }

        let parts: Vec<&str> = name.split_whitespace().collect();
        match parts.len() {
            0 => None,
            1 => Some(Author::new(parts[0], None)),
            _ => {
                let split = surname_start(&parts);
                let last = parts[split..].join(" ");
                let first = parts[..split].join(" ");
                Some(Author::new(last, Some(first.as_str())))
            }
        }
    }

    /// Parse a BibTeX author field: names separated by " and ".
    pub fn from_namelist(list: &str) -> Vec<Author> {
        list.replace('\n', " ")
            .split(" and ")
            .filter_map(Author::parse)
            .collect()
    }

    /// Render as BibTeX "Last, First" (or just "Last").
    pub fn to_bibtex(&self) -> String {
        match &self.first_names {
            Some(first) => format!("{}, {}", self.last_name, first),
            None => self.last_name.clone(),
        }
    }

    /// Render a full author list as a BibTeX field value.
    pub fn namelist_to_bibtex(authors: &[Author]) -> String {
        authors
            .iter()
            .map(Author::to_bibtex)
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Component-aware compatibility: last names must fold-equal, first
    /// names must agree position by position, where an initial matches any
    /// full name starting with the same letter. A missing first name is
    /// compatible with anything.
    pub fn compatible(&self, other: &Author) -> bool {
        if normalize_str_weak(&self.last_name) != normalize_str_weak(&other.last_name) {
            return false;
        }
        match (&self.first_names, &other.first_names) {
            (Some(a), Some(b)) => first_names_compatible(a, b),
            _ => true,
        }
    }

    /// Whether `other` carries strictly more name information (same person,
    /// fuller first names). Used when combining matched author lists.
    pub fn is_poorer_than(&self, other: &Author) -> bool {
        let mine = self.first_names.as_deref().unwrap_or("").len();
        let theirs = other.first_names.as_deref().unwrap_or("").len();
        mine < theirs
    }
}

/// Strip a trailing all-digit disambiguator token ("0001").
fn strip_disambiguator(name: &str) -> &str {
    match name.rsplit_once(char::is_whitespace) {
        Some((rest, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => {
            rest.trim_end()
        }
        _ => name,
    }
}

/// Index of the first token belonging to the surname in "First Last" order,
/// accounting for multi-word surnames like "von Wright" or "De La Cruz".
fn surname_start(parts: &[&str]) -> usize {
    let mut start = parts.len() - 1;
    while start > 0 {
        let prev = parts[start - 1].to_lowercase();
        if SURNAME_PREFIXES.contains(prev.trim_end_matches('.')) {
            start -= 1;
        } else {
            break;
        }
    }
    start.max(1)
}

/// Position-by-position comparison of first-name tokens. An initial (with
/// or without a trailing dot) matches any name sharing its first letter.
/// When one list is longer, the extra tokens are ignored.
fn first_names_compatible(a: &str, b: &str) -> bool {
    let fold = |s: &str| normalize_str_weak(s);
    let a_parts: Vec<String> = a.split_whitespace().map(fold).collect();
    let b_parts: Vec<String> = b.split_whitespace().map(fold).collect();
    for (x, y) in a_parts.iter().zip(b_parts.iter()) {
        let x = x.trim_end_matches('.');
        let y = y.trim_end_matches('.');
        if x.is_empty() || y.is_empty() {
            continue;
        }
        let initials = x.len() == 1 || y.len() == 1;
        let matched = if initials {
            x.chars().next() == y.chars().next()
        } else {
            x == y
        };
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_last() {
        assert_eq!(
            Author::parse("John Jones"),
            Some(Author::new("Jones", Some("John")))
        );
    }

    #[test]
    fn parses_last_comma_first() {
        assert_eq!(
            Author::parse("Lewis, C. S."),
            Some(Author::new("Lewis", Some("C. S.")))
        );
    }

    #[test]
    fn parses_namelist() {
        assert_eq!(
            Author::from_namelist("Lewis, C. S. and Douglas Adams"),
            vec![
                Author::new("Lewis", Some("C. S.")),
                Author::new("Adams", Some("Douglas")),
            ]
        );
        assert_eq!(Author::from_namelist(""), vec![]);
    }

    #[test]
    fn strips_disambiguator_and_keeps_prefix_surnames() {
        assert_eq!(
            Author::from_namelist("Peter Müller 0001 and Joakim von Wright"),
            vec![
                Author::new("Müller", Some("Peter")),
                Author::new("von Wright", Some("Joakim")),
            ]
        );
    }

    #[test]
    fn initials_are_compatible_with_full_names() {
        let full = Author::new("King", Some("Martin Luther"));
        let initials = Author::new("King", Some("M. L."));
        assert!(full.compatible(&initials));
        assert!(initials.compatible(&full));
    }

    #[test]
    fn different_initials_are_incompatible() {
        let a = Author::new("King", Some("Martin Luther"));
        let b = Author::new("King", Some("B."));
        assert!(!a.compatible(&b));
    }

    #[test]
    fn different_last_names_are_incompatible() {
        let a = Author::new("Jones", Some("John"));
        let b = Author::new("Smith", Some("John"));
        assert!(!a.compatible(&b));
    }

    #[test]
    fn missing_first_names_are_compatible() {
        let bare = Author::new("Jones", None);
        let full = Author::new("Jones", Some("John"));
        assert!(bare.compatible(&full));
    }

    #[test]
    fn diacritics_fold_in_comparison() {
        let a = Author::new("Müller", Some("Peter"));
        let b = Author::new("Muller", Some("P."));
        assert!(a.compatible(&b));
    }

    #[test]
    fn round_trips_to_bibtex() {
        let authors = Author::from_namelist("Lewis, C. S. and Douglas Adams");
        assert_eq!(
            Author::namelist_to_bibtex(&authors),
            "Lewis, C. S. and Adams, Douglas"
        );
    }
}
