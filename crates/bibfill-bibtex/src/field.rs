//! Typed field kinds: per-field parsing, normalization, matching, and
//! combination rules.
//!
//! Every recognized field name maps statically to a kind. A kind knows how
//! to parse a raw value, print its normal form, score two parsed values
//! against each other, and combine two matching values. Field-level scores
//! live on a `FIELD_NO_MATCH ..= FIELD_FULL_MATCH` scale; `combine` is only
//! meaningful for pairs scoring at least [`FIELD_ACCEPT`].

use crate::author::Author;
use crate::normalize::{
    normalize_doi, normalize_isbn, normalize_month, normalize_str, normalize_url,
};

/// Field-level score for definitely-different values.
pub const FIELD_NO_MATCH: i32 = -1;
/// Minimum field-level score at which two values are considered the same.
pub const FIELD_ACCEPT: i32 = 50;
/// Field-level score for equal values.
pub const FIELD_FULL_MATCH: i32 = 100;

/// The closed set of recognized field names.
pub const FIELD_NAMES: &[&str] = &[
    "address",
    "annote",
    "author",
    "booktitle",
    "chapter",
    "doi",
    "edition",
    "editor",
    "howpublished",
    "institution",
    "isbn",
    "issn",
    "issue",
    "journal",
    "keywords",
    "month",
    "note",
    "number",
    "organization",
    "pages",
    "publisher",
    "school",
    "series",
    "title",
    "type",
    "url",
    "urldate",
    "volume",
    "year",
    "abstract",
];

pub fn is_recognized(name: &str) -> bool {
    FIELD_NAMES.contains(&name)
}

/// Fields whose values are lists merged by union rather than scalars.
pub fn is_list_field(name: &str) -> bool {
    matches!(name, "author" | "editor" | "keywords")
}

/// A typed field kind.
pub trait FieldKind {
    type Parsed: Clone;

    /// Parse a raw source string. `None` means the value is invalid for
    /// this kind and must be preserved raw.
    fn parse(&self, raw: &str) -> Option<Self::Parsed>;

    /// Print the normalized display string of a parsed value.
    fn to_str(&self, parsed: &Self::Parsed) -> String;

    /// Convenience: `to_str(parse(raw))`.
    fn normalize(&self, raw: &str) -> Option<String> {
        self.parse(raw).map(|p| self.to_str(&p))
    }

    /// Score two parsed values. `FIELD_NO_MATCH` means definitely
    /// different; scores at or above [`FIELD_ACCEPT`] mean same value.
    fn matches(&self, a: &Self::Parsed, b: &Self::Parsed) -> i32;

    /// Combine two matching values into the richer one. Only called when
    /// `matches(a, b) >= FIELD_ACCEPT`.
    fn combine(&self, a: &Self::Parsed, b: &Self::Parsed) -> Self::Parsed;
}

// ── Scalar kinds ────────────────────────────────────────────────────────

/// Free-text fields compared on their strong normal form.
pub struct StrictStringField;

impl FieldKind for StrictStringField {
    type Parsed = String;

    fn parse(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn to_str(&self, parsed: &String) -> String {
        parsed.clone()
    }

    fn matches(&self, a: &String, b: &String) -> i32 {
        let na = normalize_str(a);
        let nb = normalize_str(b);
        if na.is_empty() || nb.is_empty() {
            return FIELD_NO_MATCH;
        }
        if na == nb {
            return FIELD_FULL_MATCH;
        }
        let (shorter, longer) = if na.len() <= nb.len() { (&na, &nb) } else { (&nb, &na) };
        let ratio = shorter.len() as f64 / longer.len() as f64;
        if longer.contains(shorter.as_str()) && ratio >= 0.8 {
            return (ratio * 100.0) as i32;
        }
        FIELD_NO_MATCH
    }

    fn combine(&self, a: &String, b: &String) -> String {
        // Prefer the longer raw form, it usually carries the subtitle or
        // the unabbreviated venue name.
        if b.len() > a.len() { b.clone() } else { a.clone() }
    }
}

/// DOIs are identifiers, not fuzzy: equality on the normal form or nothing.
pub struct DoiField;

impl FieldKind for DoiField {
    type Parsed = String;

    fn parse(&self, raw: &str) -> Option<String> {
        normalize_doi(raw)
    }

    fn to_str(&self, parsed: &String) -> String {
        parsed.clone()
    }

    fn matches(&self, a: &String, b: &String) -> i32 {
        if a == b { FIELD_FULL_MATCH } else { FIELD_NO_MATCH }
    }

    fn combine(&self, a: &String, _b: &String) -> String {
        a.clone()
    }
}

/// URLs compared on `(host, path+query)`.
pub struct UrlField;

impl FieldKind for UrlField {
    type Parsed = (String, String);

    fn parse(&self, raw: &str) -> Option<(String, String)> {
        normalize_url(raw)
    }

    fn to_str(&self, (host, path_query): &(String, String)) -> String {
        format!("https://{host}{path_query}")
    }

    fn matches(&self, a: &(String, String), b: &(String, String)) -> i32 {
        if a.0 != b.0 {
            return FIELD_NO_MATCH;
        }
        if a.1 == b.1 { FIELD_FULL_MATCH } else { FIELD_ACCEPT }
    }

    fn combine(&self, a: &(String, String), _b: &(String, String)) -> (String, String) {
        a.clone()
    }
}

/// Years: integer equality. A value that does not parse as an integer is
/// kept raw and scores a neutral partial against anything, so a malformed
/// year never causes a false reject on its own.
#[derive(Clone)]
pub enum YearValue {
    Number(i32),
    Raw(String),
}

pub struct YearField;

impl FieldKind for YearField {
    type Parsed = YearValue;

    fn parse(&self, raw: &str) -> Option<YearValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<i32>() {
            Ok(n) => Some(YearValue::Number(n)),
            Err(_) => Some(YearValue::Raw(trimmed.to_string())),
        }
    }

    fn to_str(&self, parsed: &YearValue) -> String {
        match parsed {
            YearValue::Number(n) => n.to_string(),
            YearValue::Raw(s) => s.clone(),
        }
    }

    fn matches(&self, a: &YearValue, b: &YearValue) -> i32 {
        match (a, b) {
            (YearValue::Number(x), YearValue::Number(y)) => {
                if x == y { FIELD_FULL_MATCH } else { FIELD_NO_MATCH }
            }
            _ => FIELD_ACCEPT,
        }
    }

    fn combine(&self, a: &YearValue, b: &YearValue) -> YearValue {
        match (a, b) {
            (YearValue::Raw(_), YearValue::Number(n)) => YearValue::Number(*n),
            _ => a.clone(),
        }
    }
}

/// Page ranges: dash variants normalized to `-`, compared by start page.
pub struct PagesField;

impl PagesField {
    fn canonical(raw: &str) -> String {
        let dashed = raw.replace('\u{2013}', "-").replace('\u{2014}', "-").replace("--", "-");
        dashed.split_whitespace().collect::<Vec<_>>().join("")
    }

    fn start_page(canonical: &str) -> &str {
        canonical.split(['-', ',']).next().unwrap_or(canonical)
    }
}

impl FieldKind for PagesField {
    type Parsed = String;

    fn parse(&self, raw: &str) -> Option<String> {
        let canonical = Self::canonical(raw);
        (!canonical.is_empty()).then_some(canonical)
    }

    fn to_str(&self, parsed: &String) -> String {
        parsed.clone()
    }

    fn matches(&self, a: &String, b: &String) -> i32 {
        if a == b {
            return FIELD_FULL_MATCH;
        }
        if Self::start_page(a) == Self::start_page(b) {
            return 75;
        }
        if a.contains(b.as_str()) || b.contains(a.as_str()) {
            return FIELD_ACCEPT;
        }
        FIELD_NO_MATCH
    }

    fn combine(&self, a: &String, b: &String) -> String {
        // Prefer the explicit range over a lone start page.
        if b.contains('-') && !a.contains('-') { b.clone() } else { a.clone() }
    }
}

/// Months normalized to `1..=12` before comparison.
pub struct MonthField;

impl FieldKind for MonthField {
    type Parsed = String;

    fn parse(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| normalize_month(trimmed))
    }

    fn to_str(&self, parsed: &String) -> String {
        parsed.clone()
    }

    fn matches(&self, a: &String, b: &String) -> i32 {
        if a == b { FIELD_FULL_MATCH } else { FIELD_NO_MATCH }
    }

    fn combine(&self, a: &String, _b: &String) -> String {
        a.clone()
    }
}

/// ISBNs: checksum-validated, compared for identity like DOIs.
pub struct IsbnField;

impl FieldKind for IsbnField {
    type Parsed = String;

    fn parse(&self, raw: &str) -> Option<String> {
        normalize_isbn(raw)
    }

    fn to_str(&self, parsed: &String) -> String {
        parsed.clone()
    }

    fn matches(&self, a: &String, b: &String) -> i32 {
        if a == b { FIELD_FULL_MATCH } else { FIELD_NO_MATCH }
    }

    fn combine(&self, a: &String, _b: &String) -> String {
        a.clone()
    }
}

// ── List kinds ──────────────────────────────────────────────────────────

/// Author and editor lists: order-independent set similarity over
/// [`Author::compatible`] pairs.
pub struct NameListField;

impl FieldKind for NameListField {
    type Parsed = Vec<Author>;

    fn parse(&self, raw: &str) -> Option<Vec<Author>> {
        let authors = Author::from_namelist(raw);
        (!authors.is_empty()).then_some(authors)
    }

    fn to_str(&self, parsed: &Vec<Author>) -> String {
        Author::namelist_to_bibtex(parsed)
    }

    fn matches(&self, a: &Vec<Author>, b: &Vec<Author>) -> i32 {
        // Same last name at the same position but incompatible first names
        // is a contradiction, not a near-miss.
        for (x, y) in a.iter().zip(b.iter()) {
            if crate::normalize::normalize_str_weak(&x.last_name)
                == crate::normalize::normalize_str_weak(&y.last_name)
                && !x.compatible(y)
            {
                return FIELD_NO_MATCH;
            }
        }

        let mut used = vec![false; b.len()];
        let mut matched = 0usize;
        for x in a {
            for (j, y) in b.iter().enumerate() {
                if !used[j] && x.compatible(y) {
                    used[j] = true;
                    matched += 1;
                    break;
                }
            }
        }
        if matched == 0 {
            return FIELD_NO_MATCH;
        }
        ((matched * 2 * FIELD_FULL_MATCH as usize) / (a.len() + b.len())) as i32
    }

    fn combine(&self, a: &Vec<Author>, b: &Vec<Author>) -> Vec<Author> {
        let mut out: Vec<Author> = Vec::with_capacity(a.len().max(b.len()));
        let mut used = vec![false; b.len()];
        for x in a {
            let mut richest = x.clone();
            for (j, y) in b.iter().enumerate() {
                if !used[j] && x.compatible(y) {
                    used[j] = true;
                    if richest.is_poorer_than(y) {
                        richest = y.clone();
                    }
                    break;
                }
            }
            out.push(richest);
        }
        for (j, y) in b.iter().enumerate() {
            if !used[j] {
                out.push(y.clone());
            }
        }
        out
    }
}

/// Lift a scalar kind to a separator-delimited list kind.
///
/// Two lists only fail to match when they are disjoint; otherwise the
/// score is the Jaccard index over element matches, and `combine` is the
/// order-preserving union (first occurrence wins).
pub struct Listify<K> {
    pub element: K,
    pub separator: char,
    pub join: &'static str,
}

impl<K: FieldKind> Listify<K> {
    fn element_eq(&self, a: &K::Parsed, b: &K::Parsed) -> bool {
        self.element.matches(a, b) >= FIELD_ACCEPT
    }
}

impl<K: FieldKind> FieldKind for Listify<K> {
    type Parsed = Vec<K::Parsed>;

    fn parse(&self, raw: &str) -> Option<Vec<K::Parsed>> {
        let items: Vec<K::Parsed> = raw
            .split(self.separator)
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| self.element.parse(s))
            .collect();
        (!items.is_empty()).then_some(items)
    }

    fn to_str(&self, parsed: &Vec<K::Parsed>) -> String {
        parsed
            .iter()
            .map(|p| self.element.to_str(p))
            .collect::<Vec<_>>()
            .join(self.join)
    }

    fn matches(&self, a: &Vec<K::Parsed>, b: &Vec<K::Parsed>) -> i32 {
        let mut used = vec![false; b.len()];
        let mut intersection = 0usize;
        for x in a {
            for (j, y) in b.iter().enumerate() {
                if !used[j] && self.element_eq(x, y) {
                    used[j] = true;
                    intersection += 1;
                    break;
                }
            }
        }
        if intersection == 0 {
            return FIELD_NO_MATCH;
        }
        let union = a.len() + b.len() - intersection;
        ((intersection * FIELD_FULL_MATCH as usize) / union) as i32
    }

    fn combine(&self, a: &Vec<K::Parsed>, b: &Vec<K::Parsed>) -> Vec<K::Parsed> {
        let mut out: Vec<K::Parsed> = a.clone();
        for y in b {
            if !out.iter().any(|x| self.element_eq(x, y)) {
                out.push(y.clone());
            }
        }
        out
    }
}

/// The keyword list: comma-separated free text.
pub fn keyword_list() -> Listify<StrictStringField> {
    Listify {
        element: StrictStringField,
        separator: ',',
        join: ", ",
    }
}

// ── Raw-value dispatch by field name ────────────────────────────────────

fn with_kind<K: FieldKind, R>(kind: K, a: &str, b: &str, f: impl FnOnce(&K, &K::Parsed, &K::Parsed) -> R) -> Option<R> {
    let pa = kind.parse(a)?;
    let pb = kind.parse(b)?;
    Some(f(&kind, &pa, &pb))
}

/// Score two raw values of the named field. `None` means not comparable
/// (either side failed to parse for an identifier-like kind).
pub fn matches_raw(name: &str, a: &str, b: &str) -> Option<i32> {
    match name {
        "doi" => with_kind(DoiField, a, b, |k, x, y| k.matches(x, y)),
        "url" => with_kind(UrlField, a, b, |k, x, y| k.matches(x, y)),
        "year" => with_kind(YearField, a, b, |k, x, y| k.matches(x, y)),
        "pages" => with_kind(PagesField, a, b, |k, x, y| k.matches(x, y)),
        "month" => with_kind(MonthField, a, b, |k, x, y| k.matches(x, y)),
        "isbn" => with_kind(IsbnField, a, b, |k, x, y| k.matches(x, y)),
        "author" | "editor" => with_kind(NameListField, a, b, |k, x, y| k.matches(x, y)),
        "keywords" => with_kind(keyword_list(), a, b, |k, x, y| k.matches(x, y)),
        _ if is_recognized(name) => with_kind(StrictStringField, a, b, |k, x, y| k.matches(x, y)),
        _ => None,
    }
}

/// Combine two raw values of the named field into one normalized value.
/// Only meaningful when `matches_raw(name, a, b) >= FIELD_ACCEPT`.
pub fn combine_raw(name: &str, a: &str, b: &str) -> Option<String> {
    match name {
        "doi" => with_kind(DoiField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "url" => with_kind(UrlField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "year" => with_kind(YearField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "pages" => with_kind(PagesField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "month" => with_kind(MonthField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "isbn" => with_kind(IsbnField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "author" | "editor" => with_kind(NameListField, a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        "keywords" => with_kind(keyword_list(), a, b, |k, x, y| k.to_str(&k.combine(x, y))),
        _ if is_recognized(name) => {
            with_kind(StrictStringField, a, b, |k, x, y| k.to_str(&k.combine(x, y)))
        }
        _ => None,
    }
}

/// Normalize a raw value of the named field. `None` when the value is
/// invalid for the field's kind (callers keep the raw form then).
pub fn normalize_raw(name: &str, raw: &str) -> Option<String> {
    match name {
        "doi" => DoiField.normalize(raw),
        "url" => UrlField.normalize(raw),
        "year" => YearField.normalize(raw),
        "pages" => PagesField.normalize(raw),
        "month" => MonthField.normalize(raw),
        "isbn" => IsbnField.normalize(raw),
        "author" | "editor" => NameListField.normalize(raw),
        "keywords" => keyword_list().normalize(raw),
        _ if is_recognized(name) => StrictStringField.normalize(raw),
        _ => Some(raw.to_string()),
    }
}
