//! Semantic Scholar (api.semanticscholar.org), graph API.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, records_at};
use crate::lookup::{Adapter, RequestParts, SearchTerms, query_words};

const FIELDS: &str = "title,authors,year,externalIds,url,venue,abstract";

pub struct SemanticScholar;

impl Adapter for SemanticScholar {
    type Record = Value;

    fn name(&self) -> &'static str {
        "semanticscholar"
    }

    fn domain(&self) -> &'static str {
        "api.semanticscholar.org"
    }

    fn no_result_statuses(&self) -> &'static [u16] {
        &[404]
    }

    fn id_request(&self, entry: &Entry) -> Option<RequestParts> {
        let doi = entry.doi()?;
        Some(RequestParts::get(format!("/graph/v1/paper/DOI:{doi}")).param("fields", FIELDS))
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut query = query_words(&terms.title, 10);
        if let Some(authors) = &terms.authors {
            query.push(' ');
            query.push_str(authors);
        }
        Some(
            RequestParts::get("/graph/v1/paper/search")
                .param("query", query)
                .param("limit", "5")
                .param("fields", FIELDS),
        )
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        let listed = records_at(&data, &["data"]);
        if !listed.is_empty() {
            return Some(listed);
        }
        // Identifier lookups answer with a bare paper object.
        if data["paperId"].is_string() {
            return Some(vec![data]);
        }
        Some(vec![])
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["title"].as_str()?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        let authors: Vec<String> = record["authors"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| a["name"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !authors.is_empty() {
            entry.set("author", &authors.join(" and "));
        }

        if let Some(year) = record["year"].as_i64() {
            entry.set("year", &year.to_string());
        }
        if let Some(doi) = record["externalIds"]["DOI"].as_str() {
            entry.set("doi", doi);
        }
        if let Some(url) = record["url"].as_str() {
            entry.set("url", url);
        }
        if let Some(venue) = record["venue"].as_str() {
            entry.set("journal", venue);
        }
        if let Some(text) = record["abstract"].as_str() {
            entry.set("abstract", text);
        }

        Some(entry)
    }
}
