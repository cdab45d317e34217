//! INSPIRE-HEP (inspirehep.net), the high-energy physics literature API.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, records_at};
use crate::lookup::{Adapter, RequestParts, SearchTerms, query_words};

const FIELDS: &str = "titles,authors,publication_info,dois,arxiv_eprints,abstracts,imprints";

pub struct InspireHep;

impl Adapter for InspireHep {
    type Record = Value;

    fn name(&self) -> &'static str {
        "hep"
    }

    fn domain(&self) -> &'static str {
        "inspirehep.net"
    }

    fn id_request(&self, entry: &Entry) -> Option<RequestParts> {
        let doi = entry.doi()?;
        Some(
            RequestParts::get("/api/literature")
                .param("q", format!("dois.value:{doi}"))
                .param("fields", FIELDS)
                .param("size", "1"),
        )
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut q = format!("title {}", query_words(&terms.title, 10));
        if let Some(authors) = &terms.authors {
            q.push_str(&format!(" and a {authors}"));
        }
        Some(
            RequestParts::get("/api/literature")
                .param("q", q)
                .param("fields", FIELDS)
                .param("size", "5"),
        )
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        Some(
            records_at(&data, &["hits", "hits"])
                .into_iter()
                .map(|hit| hit["metadata"].clone())
                .filter(|m| m.is_object())
                .collect(),
        )
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["titles"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|t| t["title"].as_str())?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        // full_name is already "Last, First"
        let authors: Vec<String> = record["authors"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| a["full_name"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !authors.is_empty() {
            entry.set("author", &authors.join(" and "));
        }

        if let Some(doi) = record["dois"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|d| d["value"].as_str())
        {
            entry.set("doi", doi);
        }

        let pub_info = &record["publication_info"][0];
        if let Some(year) = pub_info["year"].as_i64() {
            entry.set("year", &year.to_string());
        }
        if let Some(journal) = pub_info["journal_title"].as_str() {
            entry.set("journal", journal);
        }
        if let Some(volume) = pub_info["journal_volume"].as_str() {
            entry.set("volume", volume);
        }
        if let Some(issue) = pub_info["journal_issue"].as_str() {
            entry.set("number", issue);
        }
        if let Some(pages) = super::page_range(
            pub_info["page_start"].as_str(),
            pub_info["page_end"].as_str(),
        ) {
            entry.set("pages", &pages);
        }

        if entry.get("year").is_none()
            && let Some(date) = record["imprints"][0]["date"].as_str()
            && date.len() >= 4
        {
            entry.set("year", &date[..4]);
        }

        if let Some(text) = record["abstracts"][0]["value"].as_str() {
            entry.set("abstract", text);
        }

        Some(entry)
    }
}
