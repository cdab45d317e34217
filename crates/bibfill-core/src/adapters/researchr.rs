//! Researchr (researchr.org), a curated publication search.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, page_range, records_at};
use crate::lookup::{Adapter, RequestParts, SearchTerms};

pub struct Researchr;

impl Adapter for Researchr {
    type Record = Value;

    fn name(&self) -> &'static str {
        "researchr"
    }

    fn domain(&self) -> &'static str {
        "researchr.org"
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut q = terms.title.clone();
        if let Some(authors) = &terms.authors {
            q.push(' ');
            q.push_str(authors);
        }
        // The search term is a path segment, not a query parameter.
        Some(RequestParts::get(format!(
            "/api/search/publication/{}",
            urlencoding::encode(q.trim())
        )))
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        Some(records_at(&data, &["result"]))
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["title"].as_str()?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        if let Some(authors) = researchr_authors(&record["authors"]) {
            entry.set("author", &authors);
        }
        if let Some(year) = record["year"].as_i64() {
            entry.set("year", &year.to_string());
        }
        if let Some(doi) = record["doi"].as_str() {
            entry.set("doi", doi);
        }
        if let Some(pages) =
            page_range(record["firstpage"].as_str(), record["lastpage"].as_str())
        {
            entry.set("pages", &pages);
        }
        if let Some(booktitle) = record["booktitle"].as_str() {
            entry.set("booktitle", booktitle);
        }
        if let Some(journal) = record["journal"]
            .as_str()
            .or_else(|| record["journal"]["name"].as_str())
        {
            entry.set("journal", journal);
        }
        if let Some(publisher) = record["publisher"]
            .as_str()
            .or_else(|| record["publisher"]["name"].as_str())
        {
            entry.set("publisher", publisher);
        }
        if let Some(volume) = record["volume"].as_str() {
            entry.set("volume", volume);
        }
        if let Some(number) = record["number"].as_str() {
            entry.set("number", number);
        }

        Some(entry)
    }
}

/// Researchr author records nest the display name under `alias.name` (or
/// `person.name` for unaliased people).
fn researchr_authors(value: &Value) -> Option<String> {
    let names: Vec<String> = value
        .as_array()?
        .iter()
        .filter_map(|a| {
            a["alias"]["name"]
                .as_str()
                .or_else(|| a["person"]["name"].as_str())
                .or_else(|| a["name"].as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .collect();
    (!names.is_empty()).then(|| names.join(" and "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_term_is_a_path_segment() {
        let parts = Researchr
            .search_request(&SearchTerms {
                title: "path deformation".into(),
                authors: Some("Lamiraux".into()),
            })
            .unwrap();
        assert_eq!(
            parts.path,
            "/api/search/publication/path%20deformation%20Lamiraux"
        );
        assert!(parts.query.is_empty());
    }

    #[test]
    fn record_maps_pages_and_aliases() {
        let record = serde_json::json!({
            "title": "Reactive Path Deformation for Nonholonomic Mobile Robots",
            "authors": [
                {"alias": {"name": "Florent Lamiraux"}},
                {"person": {"name": "David Bonnafous"}}
            ],
            "year": 2004,
            "doi": "10.1109/TRO.2004.829459",
            "firstpage": "967",
            "lastpage": "977",
            "booktitle": "ICRA"
        });
        let entry = Researchr.record_to_entry(record).unwrap();
        assert_eq!(entry.get("pages"), Some("967-977"));
        assert_eq!(entry.authors().len(), 2);
        assert_eq!(entry.get("booktitle"), Some("ICRA"));
    }

    #[test]
    fn result_array_is_the_record_list() {
        let body = serde_json::json!({"result": [{"title": "X"}]}).to_string();
        assert_eq!(Researchr.extract_records(body.as_bytes()).unwrap().len(), 1);
    }
}
