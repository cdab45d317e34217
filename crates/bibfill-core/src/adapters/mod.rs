//! Per-service adapters. Each file is thin glue over the lookup engine:
//! request construction for the supported query shapes and record-to-entry
//! conversion, nothing else.

pub mod arxiv;
pub mod crossref;
pub mod dblp;
pub mod hep;
pub mod openalex;
pub mod researchr;
pub mod semantic_scholar;
pub mod unpaywall;

use std::sync::Arc;

use serde_json::Value;

use crate::CoreError;
use crate::lookup::DynLookup;

/// All adapters in priority order. Merge conflicts between services are
/// resolved by this order, so it is part of the engine's contract.
pub fn default_adapters(mailto: Option<String>) -> Vec<Arc<dyn DynLookup>> {
    vec![
        Arc::new(crossref::Crossref {
            mailto: mailto.clone(),
        }),
        Arc::new(dblp::Dblp),
        Arc::new(arxiv::Arxiv),
        Arc::new(unpaywall::Unpaywall { mailto: mailto.clone() }),
        Arc::new(researchr::Researchr),
        Arc::new(openalex::OpenAlex { mailto }),
        Arc::new(semantic_scholar::SemanticScholar),
        Arc::new(hep::InspireHep),
    ]
}

/// Filter the adapter list by `--only-query` / `--dont-query` names
/// (case-insensitive). Unknown names are configuration errors.
pub fn filter_adapters(
    adapters: Vec<Arc<dyn DynLookup>>,
    only: &[String],
    disabled: &[String],
) -> Result<Vec<Arc<dyn DynLookup>>, CoreError> {
    let known: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
    for name in only.iter().chain(disabled) {
        if !known.iter().any(|k| k.eq_ignore_ascii_case(name)) {
            return Err(CoreError::UnknownAdapter(name.clone()));
        }
    }

    Ok(adapters
        .into_iter()
        .filter(|a| {
            let name = a.name();
            let kept = only.is_empty() || only.iter().any(|o| o.eq_ignore_ascii_case(name));
            kept && !disabled.iter().any(|d| d.eq_ignore_ascii_case(name))
        })
        .collect())
}

// ── Shared JSON helpers ─────────────────────────────────────────────────

/// Decode a JSON body. `None` means the server spoke the wrong dialect.
pub(crate) fn decode_json(body: &[u8]) -> Option<Value> {
    serde_json::from_slice(body).ok()
}

/// Records under a key path. A missing path or a non-array value reads as
/// an empty result set, not a decode failure.
pub(crate) fn records_at(value: &Value, path: &[&str]) -> Vec<Value> {
    let mut cursor = value;
    for key in path {
        cursor = &cursor[*key];
    }
    cursor.as_array().cloned().unwrap_or_default()
}

/// First string of a JSON array field like Crossref's `title`.
pub(crate) fn first_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value[key].as_array()?.first()?.as_str()
}

/// Join "given family" person objects into a BibTeX name list.
pub(crate) fn given_family_authors(list: &Value, given: &str, family: &str) -> Option<String> {
    let authors: Vec<String> = list
        .as_array()?
        .iter()
        .filter_map(|a| {
            let family = a[family].as_str().unwrap_or("").trim();
            if family.is_empty() {
                return None;
            }
            let given = a[given].as_str().unwrap_or("").trim();
            Some(if given.is_empty() {
                family.to_string()
            } else {
                format!("{family}, {given}")
            })
        })
        .collect();
    (!authors.is_empty()).then(|| authors.join(" and "))
}

/// Combine first/last page values into a BibTeX page range.
pub(crate) fn page_range(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let first = first.map(str::trim).filter(|s| !s.is_empty())?;
    match last.map(str::trim).filter(|s| !s.is_empty() && *s != first) {
        Some(last) => Some(format!("{first}-{last}")),
        None => Some(first.to_string()),
    }
}

/// Strip markup tags from abstracts that arrive as JATS/HTML fragments.
pub(crate) fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_adapter_order_is_the_priority_order() {
        let names: Vec<&str> = default_adapters(None).iter().map(|a| a.name()).collect();
        assert_eq!(
            names,
            vec![
                "crossref",
                "dblp",
                "arxiv",
                "unpaywall",
                "researchr",
                "openalex",
                "semanticscholar",
                "hep",
            ]
        );
    }

    #[test]
    fn filter_honors_only_and_disabled() {
        let kept = filter_adapters(
            default_adapters(None),
            &["Crossref".to_string(), "DBLP".to_string()],
            &["dblp".to_string()],
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name(), "crossref");
    }

    #[test]
    fn filter_rejects_unknown_names() {
        let err = filter_adapters(default_adapters(None), &[], &["nosuch".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn records_at_tolerates_missing_paths() {
        let v: Value = serde_json::json!({"message": {}});
        assert!(records_at(&v, &["message", "items"]).is_empty());
    }

    #[test]
    fn given_family_joins_names() {
        let v = serde_json::json!([
            {"given": "Florent", "family": "Lamiraux"},
            {"given": "", "family": "Bonnafous"},
            {"given": "Ghost", "family": ""},
        ]);
        assert_eq!(
            given_family_authors(&v, "given", "family").as_deref(),
            Some("Lamiraux, Florent and Bonnafous")
        );
    }

    #[test]
    fn page_range_handles_partial_data() {
        assert_eq!(page_range(Some("967"), Some("977")).as_deref(), Some("967-977"));
        assert_eq!(page_range(Some("967"), None).as_deref(), Some("967"));
        assert_eq!(page_range(Some("967"), Some("967")).as_deref(), Some("967"));
        assert_eq!(page_range(None, Some("977")), None);
    }

    #[test]
    fn strip_markup_removes_jats_tags() {
        assert_eq!(
            strip_markup("<jats:p>An  abstract</jats:p>"),
            "An abstract"
        );
    }
}
