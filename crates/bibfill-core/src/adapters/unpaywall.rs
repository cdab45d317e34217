//! Unpaywall (api.unpaywall.org): DOI-keyed open-access metadata.
//!
//! Identifier lookups only; entries without a DOI never reach this
//! adapter. Unknown DOIs answer 404 or 422, which read as "no results".

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, given_family_authors};
use crate::lookup::{Adapter, RequestParts, SearchTerms};

pub struct Unpaywall {
    pub mailto: Option<String>,
}

impl Adapter for Unpaywall {
    type Record = Value;

    fn name(&self) -> &'static str {
        "unpaywall"
    }

    fn domain(&self) -> &'static str {
        "api.unpaywall.org"
    }

    fn no_result_statuses(&self) -> &'static [u16] {
        &[404, 422]
    }

    fn id_request(&self, entry: &Entry) -> Option<RequestParts> {
        let doi = entry.doi()?;
        let email = self.mailto.clone().unwrap_or_else(|| "hello@bibfill.org".to_string());
        Some(RequestParts::get(format!("/v2/{doi}")).param("email", email))
    }

    fn search_request(&self, _terms: &SearchTerms) -> Option<RequestParts> {
        None
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        if data["doi"].is_string() || data["title"].is_string() {
            Some(vec![data])
        } else {
            Some(vec![])
        }
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["title"].as_str()?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        if let Some(doi) = record["doi"].as_str() {
            entry.set("doi", doi);
        }
        if let Some(authors) = given_family_authors(&record["z_authors"], "given", "family") {
            entry.set("author", &authors);
        }
        if let Some(year) = record["year"].as_i64() {
            entry.set("year", &year.to_string());
        }
        if let Some(journal) = record["journal_name"].as_str() {
            entry.set("journal", journal);
        }
        if let Some(publisher) = record["publisher"].as_str() {
            entry.set("publisher", publisher);
        }
        if let Some(issn) = record["journal_issn_l"].as_str() {
            entry.set("issn", issn);
        }
        let oa = &record["best_oa_location"];
        if let Some(url) = oa["url_for_pdf"].as_str().or_else(|| oa["url"].as_str()) {
            entry.set("url", url);
        }

        Some(entry)
    }
}
