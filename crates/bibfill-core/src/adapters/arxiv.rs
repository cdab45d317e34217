//! arXiv (export.arxiv.org), Atom XML over the query API.

use bibfill_bibtex::Entry;

use crate::lookup::{Adapter, RequestParts, SearchTerms, query_words};

pub struct Arxiv;

/// One `<entry>` of the Atom feed.
#[derive(Debug, Default, Clone)]
pub struct ArxivRecord {
    title: String,
    authors: Vec<String>,
    published: String,
    link: String,
    doi: String,
    summary: String,
    journal_ref: String,
}

impl Adapter for Arxiv {
    type Record = ArxivRecord;

    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn domain(&self) -> &'static str {
        "export.arxiv.org"
    }

    fn accept(&self) -> &'static str {
        "application/atom+xml"
    }

    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts> {
        let mut query = format!("ti:\"{}\"", query_words(&terms.title, 10));
        if let Some(authors) = &terms.authors {
            query.push_str(&format!(" AND au:\"{authors}\""));
        }
        Some(
            RequestParts::get("/api/query")
                .param("search_query", query)
                .param("start", "0")
                .param("max_results", "5"),
        )
    }

    fn extract_records(&self, body: &[u8]) -> Option<Vec<ArxivRecord>> {
        let text = String::from_utf8_lossy(body);
        parse_feed(&text)
    }

    fn record_to_entry(&self, record: ArxivRecord) -> Option<Entry> {
        let title = record.title.trim();
        if title.is_empty() {
            return None;
        }
        let mut entry = Entry::new("", "article");
        entry.set("title", &title.split_whitespace().collect::<Vec<_>>().join(" "));

        if !record.authors.is_empty() {
            entry.set("author", &record.authors.join(" and "));
        }
        // published looks like 2004-12-06T...; the leading 4 chars are the year
        if record.published.len() >= 4 {
            entry.set("year", &record.published[..4]);
        }
        if !record.link.is_empty() {
            entry.set("url", &record.link);
        }
        if !record.doi.is_empty() {
            entry.set("doi", &record.doi);
        }
        if !record.summary.is_empty() {
            entry.set(
                "abstract",
                &record.summary.split_whitespace().collect::<Vec<_>>().join(" "),
            );
        }
        if !record.journal_ref.is_empty() {
            entry.set("journal", &record.journal_ref);
        }
        Some(entry)
    }
}

/// Walk the Atom feed and collect its entries. `None` on malformed XML.
fn parse_feed(xml: &str) -> Option<Vec<ArxivRecord>> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);

    let mut records = Vec::new();
    let mut current = ArxivRecord::default();

    let mut in_entry = false;
    let mut in_author = false;
    let mut text_target: Option<&'static str> = None;
    let mut current_name = String::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => {
                        in_entry = true;
                        current = ArxivRecord::default();
                    }
                    b"title" if in_entry => text_target = Some("title"),
                    b"published" if in_entry => text_target = Some("published"),
                    b"summary" if in_entry => text_target = Some("summary"),
                    b"doi" if in_entry => text_target = Some("doi"),
                    b"journal_ref" if in_entry => text_target = Some("journal_ref"),
                    b"author" if in_entry => {
                        in_author = true;
                        current_name.clear();
                    }
                    b"name" if in_author => text_target = Some("name"),
                    b"link" if in_entry => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"href" && current.link.is_empty() {
                                current.link = String::from_utf8_lossy(&attr.value).to_string();
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"link" && in_entry {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"href" && current.link.is_empty() {
                            current.link = String::from_utf8_lossy(&attr.value).to_string();
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                match text_target {
                    Some("title") => current.title.push_str(&text),
                    Some("published") => current.published.push_str(&text),
                    Some("summary") => current.summary.push_str(&text),
                    Some("doi") => current.doi.push_str(&text),
                    Some("journal_ref") => current.journal_ref.push_str(&text),
                    Some("name") => current_name.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => {
                        in_entry = false;
                        records.push(current.clone());
                    }
                    b"author" => {
                        let name = current_name.trim();
                        if !name.is_empty() {
                            current.authors.push(name.to_string());
                        }
                        in_author = false;
                    }
                    b"title" | b"published" | b"summary" | b"doi" | b"journal_ref" | b"name" => {
                        text_target = None;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    Some(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query Results</title>
  <entry>
    <id>http://arxiv.org/abs/2403.00001v1</id>
    <title>Reactive Path Deformation
      for Nonholonomic Mobile Robots</title>
    <published>2004-12-06T00:00:00Z</published>
    <summary>We present a method.</summary>
    <author><name>Florent Lamiraux</name></author>
    <author><name>David Bonnafous</name></author>
    <link href="http://arxiv.org/abs/2403.00001v1" rel="alternate"/>
    <arxiv:doi>10.1109/TRO.2004.829459</arxiv:doi>
  </entry>
</feed>"#;

    #[test]
    fn parses_atom_entries() {
        let records = parse_feed(FEED).unwrap();
        assert_eq!(records.len(), 1);

        let entry = Arxiv.record_to_entry(records[0].clone()).unwrap();
        assert_eq!(
            entry.title(),
            Some("Reactive Path Deformation for Nonholonomic Mobile Robots")
        );
        assert_eq!(entry.get("year"), Some("2004"));
        assert_eq!(entry.doi().as_deref(), Some("10.1109/tro.2004.829459"));
        assert_eq!(entry.authors().len(), 2);
        assert!(entry.url().is_some());
    }

    #[test]
    fn feed_title_is_not_an_entry_title() {
        let records = parse_feed(FEED).unwrap();
        assert!(!records[0].title.contains("Query Results"));
    }

    #[test]
    fn empty_feed_yields_no_records() {
        let xml = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn mismatched_tags_are_a_decode_failure() {
        assert!(Arxiv.extract_records(b"<feed><entry></wrong>").is_none());
    }

    #[test]
    fn tagless_body_reads_as_no_records() {
        assert!(Arxiv.extract_records(b"{\"not\": \"xml\"}").unwrap().is_empty());
    }
}
