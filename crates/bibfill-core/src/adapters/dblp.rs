//! DBLP (dblp.org), the computer science bibliography.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, records_at};
use crate::lookup::{Adapter, RequestParts, SearchTerms};

pub struct Dblp;

impl Adapter for Dblp {
    type Record = Value;

    fn name(&self) -> &'static str {
        "dblp"
    }

    fn domain(&self) -> &'static str {
        "dblp.org"
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut q = terms.title.clone();
        if let Some(authors) = &terms.authors {
            q.push(' ');
            q.push_str(authors);
        }
        Some(
            RequestParts::get("/search/publ/api")
                .param("q", q)
                .param("format", "json")
                .param("h", "5"),
        )
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        Some(
            records_at(&data, &["result", "hits", "hit"])
                .into_iter()
                .map(|hit| hit["info"].clone())
                .filter(|info| info.is_object())
                .collect(),
        )
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["title"].as_str()?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title.trim_end_matches('.'));

        if let Some(authors) = dblp_authors(&record["authors"]["author"]) {
            entry.set("author", &authors);
        }
        if let Some(year) = record["year"].as_str() {
            entry.set("year", year);
        }
        if let Some(doi) = record["doi"].as_str() {
            entry.set("doi", doi);
        }
        if let Some(ee) = record["ee"].as_str() {
            entry.set("url", ee);
        }
        if let Some(venue) = record["venue"].as_str() {
            // "Journal Articles" vs conference/workshop papers
            if record["type"].as_str().is_some_and(|t| t.contains("Journal")) {
                entry.set("journal", venue);
            } else {
                entry.set("booktitle", venue);
            }
        }
        if let Some(pages) = record["pages"].as_str() {
            entry.set("pages", pages);
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

/// DBLP author lists come in three shapes: an array of objects, a single
/// object, or plain strings. Author names may carry "0001" disambiguators;
/// the entry setter strips those during name parsing.
fn dblp_authors(value: &Value) -> Option<String> {
    let one = |v: &Value| -> Option<String> {
        v.as_str()
            .or_else(|| v["text"].as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let names: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        other => one(other).into_iter().collect(),
    };
    (!names.is_empty()).then(|| names.join(" and "))
}
