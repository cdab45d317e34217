//! Crossref (api.crossref.org), the broadest DOI registry.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, first_str, given_family_authors, records_at, strip_markup};
use crate::lookup::{Adapter, RequestParts, SearchTerms, query_words};

pub struct Crossref {
    /// Contact address for the polite pool; also sent as `mailto`.
    pub mailto: Option<String>,
}

impl Adapter for Crossref {
    type Record = Value;

    fn name(&self) -> &'static str {
        "crossref"
    }

    fn domain(&self) -> &'static str {
        "api.crossref.org"
    }

    fn id_request(&self, entry: &Entry) -> Option<RequestParts> {
        let doi = entry.doi()?;
        Some(RequestParts::get(format!("/works/{doi}")))
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut parts = RequestParts::get("/works")
            .param("query.title", query_words(&terms.title, 10))
            .param("rows", "5");
        if let Some(authors) = &terms.authors {
            parts = parts.param("query.author", authors);
        }
        if let Some(mailto) = &self.mailto {
            parts = parts.param("mailto", mailto);
        }
        Some(parts)
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        // Search responses carry message.items; DOI lookups a bare work.
        let items = records_at(&data, &["message", "items"]);
        if !items.is_empty() {
            return Some(items);
        }
        let message = &data["message"];
        if message.is_object() && !message["title"].is_null() {
            return Some(vec![message.clone()]);
        }
        Some(vec![])
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = first_str(&record, "title")?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        if let Some(authors) = given_family_authors(&record["author"], "given", "family") {
            entry.set("author", &authors);
        }
        if let Some(editors) = given_family_authors(&record["editor"], "given", "family") {
            entry.set("editor", &editors);
        }
        if let Some(doi) = record["DOI"].as_str() {
            entry.set("doi", doi);
        }
        if let Some(url) = record["URL"].as_str() {
            entry.set("url", url);
        }

        let work_type = record["type"].as_str().unwrap_or("");
        if let Some(container) = first_str(&record, "container-title") {
            if work_type.starts_with("proceedings") || work_type == "book-chapter" {
                entry.set("booktitle", container);
            } else {
                entry.set("journal", container);
            }
        }

        if let Some(publisher) = record["publisher"].as_str() {
            entry.set("publisher", publisher);
        }
        if let Some(pages) = record["page"].as_str() {
            entry.set("pages", pages);
        }
        if let Some(volume) = record["volume"].as_str() {
            entry.set("volume", volume);
        }
        if let Some(issue) = record["issue"].as_str() {
            entry.set("number", issue);
        }
        if let Some(issn) = first_str(&record, "ISSN") {
            entry.set("issn", issn);
        }
        if let Some(isbn) = first_str(&record, "ISBN") {
            entry.set("isbn", isbn);
        }

        // issued > published-print > published-online, first available
        for date_key in ["issued", "published-print", "published-online"] {
            let parts = &record[date_key]["date-parts"][0];
            if let Some(year) = parts[0].as_i64() {
                entry.set("year", &year.to_string());
                if let Some(month) = parts[1].as_i64() {
                    entry.set("month", &month.to_string());
                }
                break;
            }
        }

        if let Some(text) = record["abstract"].as_str() {
            entry.set("abstract", &strip_markup(text));
        }

        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Adapter;

    fn sample_record() -> Value {
        serde_json::json!({
            "title": ["Reactive Path Deformation for Nonholonomic Mobile Robots"],
            "author": [
                {"given": "Florent", "family": "Lamiraux"},
                {"given": "David", "family": "Bonnafous"}
            ],
            "DOI": "10.1109/TRO.2004.829459",
            "URL": "https://doi.org/10.1109/tro.2004.829459",
            "type": "journal-article",
            "container-title": ["IEEE Transactions on Robotics"],
            "publisher": "IEEE",
            "page": "967-977",
            "volume": "20",
            "issue": "6",
            "issued": {"date-parts": [[2004, 12]]}
        })
    }

    #[test]
    fn record_maps_to_entry_fields() {
        let entry = Crossref { mailto: None }.record_to_entry(sample_record()).unwrap();
        assert_eq!(
            entry.title(),
            Some("Reactive Path Deformation for Nonholonomic Mobile Robots")
        );
        assert_eq!(entry.doi().as_deref(), Some("10.1109/tro.2004.829459"));
        assert_eq!(entry.get("journal"), Some("IEEE Transactions on Robotics"));
        assert_eq!(entry.get("pages"), Some("967-977"));
        assert_eq!(entry.get("year"), Some("2004"));
        assert_eq!(entry.get("month"), Some("12"));
        assert_eq!(entry.get("number"), Some("6"));
        assert_eq!(entry.authors().len(), 2);
    }

    #[test]
    fn records_come_from_message_items() {
        let body = serde_json::json!({
            "message": {"items": [sample_record()]}
        })
        .to_string();
        let records = Crossref { mailto: None }.extract_records(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn doi_lookup_returns_single_record() {
        let body = serde_json::json!({"message": sample_record()}).to_string();
        let records = Crossref { mailto: None }.extract_records(body.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn invalid_json_is_a_decode_failure() {
        assert!(Crossref { mailto: None }.extract_records(b"<html>nope</html>").is_none());
    }

    #[test]
    fn titleless_records_are_dropped() {
        let record = serde_json::json!({"DOI": "10.1000/1", "title": []});
        assert!(Crossref { mailto: None }.record_to_entry(record).is_none());
    }

    #[test]
    fn search_request_includes_mailto() {
        let adapter = Crossref { mailto: Some("team@example.org".into()) };
        let parts = adapter
            .search_request(&SearchTerms {
                title: "A Paper".into(),
                authors: Some("Jones".into()),
            })
            .unwrap();
        assert_eq!(parts.path, "/works");
        assert!(parts.query.iter().any(|(k, _)| k == "query.author"));
        assert!(parts.query.iter().any(|(k, v)| k == "mailto" && v == "team@example.org"));
    }
}
