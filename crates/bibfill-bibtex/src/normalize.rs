//! Pure string normalizers shared by the field model and the matcher.
//!
//! Every function here is idempotent: applying it twice yields the same
//! result as applying it once. Normalizers either return the normal form
//! or `None` when the input has no valid normal form.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// English month names (full and 3-letter) mapped to `1..=12`.
pub static EN_MONTHS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let names = [
        ("january", "jan", 1),
        ("february", "feb", 2),
        ("march", "mar", 3),
        ("april", "apr", 4),
        ("may", "may", 5),
        ("june", "jun", 6),
        ("july", "jul", 7),
        ("august", "aug", 8),
        ("september", "sep", 9),
        ("october", "oct", 10),
        ("november", "nov", 11),
        ("december", "dec", 12),
    ];
    for (full, short, n) in names {
        m.insert(full, n);
        m.insert(short, n);
    }
    m
});

static DOI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"10\.\d{4,9}/\S+").unwrap());

/// Weak normal form: NFKD-fold, strip diacritics, lowercase, collapse runs
/// of ASCII whitespace. Punctuation is preserved.
pub fn normalize_str_weak(s: &str) -> String {
    let folded: String = s
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();
    collapse_whitespace(&folded)
}

/// Strong normal form used for fuzzy comparison: weak form, then every
/// character outside `[a-z0-9]` becomes a space, runs collapsed, trimmed.
pub fn normalize_str(s: &str) -> String {
    let weak = normalize_str_weak(s);
    let stripped: String = weak
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&stripped)
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.trim().chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Extract the canonical `10.REG/SUFFIX` form of a DOI.
///
/// Strips any URL prefix (`https://doi.org/`, `https://dx.doi.org/`, or any
/// other host/path prefix ending at the `10.` segment) and lowercases.
/// Returns `None` when no `10.\d{4,9}/suffix` segment is present.
pub fn normalize_doi(s: &str) -> Option<String> {
    let lowered = s.trim().to_lowercase();
    DOI_RE.find(&lowered).map(|m| m.as_str().to_string())
}

/// Split a URL into `(host, path+query)`.
///
/// Only `http` and `https` schemes are accepted; everything else, and any
/// string the URL parser rejects, yields `None`. Spaces in the query are
/// written as `+`.
pub fn normalize_url(s: &str) -> Option<(String, String)> {
    let url = url::Url::parse(s.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?.to_string();
    let mut path_query = url.path().to_string();
    if let Some(query) = url.query() {
        path_query.push('?');
        path_query.push_str(&query.replace("%20", "+").replace(' ', "+"));
    }
    Some((host, path_query))
}

/// Normalize a month to its decimal string `"1".."12"`.
///
/// Accepts English month names (full or 3-letter, any case) and decimal
/// strings already in range. Anything else is returned unchanged.
pub fn normalize_month(s: &str) -> String {
    let trimmed = s.trim();
    let lowered = trimmed.to_lowercase();
    if let Some(n) = EN_MONTHS.get(lowered.trim_end_matches('.')) {
        return n.to_string();
    }
    if let Ok(n) = trimmed.parse::<u32>()
        && (1..=12).contains(&n)
    {
        return n.to_string();
    }
    s.to_string()
}

/// Normalize an ISBN: strip separators, validate the ISBN-10 or ISBN-13
/// checksum, return the bare digit form. `None` when the checksum fails.
pub fn normalize_isbn(s: &str) -> Option<String> {
    let bare: String = s
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match bare.len() {
        10 => {
            // ISBN-10: sum of digit * position (10..1), X = 10 as check digit
            let mut sum: u32 = 0;
            for (i, c) in bare.chars().enumerate() {
                let value = match c {
                    '0'..='9' => c as u32 - '0' as u32,
                    'X' if i == 9 => 10,
                    _ => return None,
                };
                sum += value * (10 - i as u32);
            }
            (sum % 11 == 0).then_some(bare)
        }
        13 => {
            // ISBN-13: alternating weights 1 and 3
            let mut sum: u32 = 0;
            for (i, c) in bare.chars().enumerate() {
                let digit = c.to_digit(10)?;
                sum += digit * if i % 2 == 0 { 1 } else { 3 };
            }
            (sum % 10 == 0).then_some(bare)
        }
        _ => None,
    }
}
