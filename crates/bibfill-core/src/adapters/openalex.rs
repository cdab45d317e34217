//! OpenAlex (api.openalex.org), the open scholarly graph.

use serde_json::Value;

use bibfill_bibtex::Entry;

use super::{decode_json, records_at};
use crate::lookup::{Adapter, RequestParts, SearchTerms};

pub struct OpenAlex {
    pub mailto: Option<String>,
}

impl Adapter for OpenAlex {
    type Record = Value;

    fn name(&self) -> &'static str {
        "openalex"
    }

    fn domain(&self) -> &'static str {
        "api.openalex.org"
    }

    fn no_result_statuses(&self) -> &'static [u16] {
        &[404]
    }

    fn id_request(&self, entry: &Entry) -> Option<RequestParts> {
        let doi = entry.doi()?;
        let mut parts = RequestParts::get(format!("/works/https://doi.org/{doi}"));
        if let Some(mailto) = &self.mailto {
            parts = parts.param("mailto", mailto);
        }
        Some(parts)
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut search = terms.title.clone();
        if let Some(authors) = &terms.authors {
            search.push(' ');
            search.push_str(authors);
        }
        let mut parts = RequestParts::get("/works")
            .param("search", search)
            .param("per-page", "5");
        if let Some(mailto) = &self.mailto {
            parts = parts.param("mailto", mailto);
        }
        Some(parts)
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<Value>> {
        let data = decode_json(body)?;
        let results = records_at(&data, &["results"]);
        if !results.is_empty() {
            return Some(results);
        }
        // DOI lookups answer with a bare work object.
        if data["id"].is_string() {
            return Some(vec![data]);
        }
        Some(vec![])
    }

    fn record_to_entry(&self, record: Value) -> Option<Entry> {
        let title = record["display_name"]
            .as_str()
            .or_else(|| record["title"].as_str())?;
        let mut entry = Entry::new("", "article");
        entry.set("title", title);

        let authors: Vec<String> = record["authorships"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| a["author"]["display_name"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !authors.is_empty() {
            entry.set("author", &authors.join(" and "));
        }

        if let Some(year) = record["publication_year"].as_i64() {
            entry.set("year", &year.to_string());
        }
        if let Some(doi) = record["doi"].as_str() {
            // arrives as https://doi.org/10.x; the setter normalizes
            entry.set("doi", doi);
        }
        if let Some(url) = record["primary_location"]["landing_page_url"].as_str() {
            entry.set("url", url);
        }
        if let Some(venue) = record["primary_location"]["source"]["display_name"].as_str() {
            entry.set("journal", venue);
        }
        let biblio = &record["biblio"];
        if let Some(pages) = super::page_range(
            biblio["first_page"].as_str(),
            biblio["last_page"].as_str(),
        ) {
            entry.set("pages", &pages);
        }
        if let Some(volume) = biblio["volume"].as_str() {
            entry.set("volume", volume);
        }
        if let Some(issue) = biblio["issue"].as_str() {
            entry.set("number", issue);
        }

        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        serde_json::json!({
            "id": "https://openalex.org/W123",
            "display_name": "Reactive Path Deformation for Nonholonomic Mobile Robots",
            "publication_year": 2004,
            "doi": "https://doi.org/10.1109/tro.2004.829459",
            "authorships": [
                {"author": {"display_name": "Florent Lamiraux"}},
                {"author": {"display_name": "David Bonnafous"}}
            ],
            "primary_location": {
                "landing_page_url": "https://ieeexplore.ieee.org/document/1362682",
                "source": {"display_name": "IEEE Transactions on Robotics"}
            },
            "biblio": {"volume": "20", "issue": "6", "first_page": "967", "last_page": "977"}
        })
    }

    #[test]
    fn record_maps_graph_fields() {
        let entry = OpenAlex { mailto: None }.record_to_entry(sample()).unwrap();
        assert_eq!(entry.doi().as_deref(), Some("10.1109/tro.2004.829459"));
        assert_eq!(entry.get("pages"), Some("967-977"));
        assert_eq!(entry.get("volume"), Some("20"));
        assert_eq!(entry.get("number"), Some("6"));
        assert_eq!(entry.get("journal"), Some("IEEE Transactions on Robotics"));
    }

    #[test]
    fn search_results_and_single_works_both_decode() {
        let adapter = OpenAlex { mailto: None };
        let listed = serde_json::json!({"results": [sample()]}).to_string();
        assert_eq!(adapter.extract_records(listed.as_bytes()).unwrap().len(), 1);
        let single = sample().to_string();
        assert_eq!(adapter.extract_records(single.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn doi_request_uses_url_form() {
        let adapter = OpenAlex { mailto: None };
        let mut entry = Entry::new("k", "article");
        entry.set("doi", "10.1109/tro.2004.829459");
        let parts = adapter.id_request(&entry).unwrap();
        assert_eq!(parts.path, "/works/https://doi.org/10.1109/tro.2004.829459");
    }
}
