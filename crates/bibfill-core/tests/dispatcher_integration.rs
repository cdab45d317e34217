//! Integration tests for the dispatcher.
//!
//! A scripted mock implements [`DynLookup`] directly, so no HTTP requests
//! are made; the tests exercise fan-out, priority-ordered merging, the
//! identifier short-circuit, budgets, and cancellation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bibfill_bibtex::{CERTAIN_MATCH, Entry, match_score};
use bibfill_core::adapters::crossref::Crossref;
use bibfill_core::lookup::Adapter as _;
use bibfill_core::{
    Candidate, DynLookup, EngineConfig, LookupContext, Outcome, ProgressEvent, complete_entries,
};

enum MockResponse {
    Match {
        fields: Vec<(&'static str, &'static str)>,
        score: i32,
    },
    NoMatch,
    HttpError(u16),
    /// Block until the entry's token is cancelled.
    WaitForCancel,
}

struct MockLookup {
    name: &'static str,
    domain: &'static str,
    delay: Option<Duration>,
    response: MockResponse,
    calls: AtomicUsize,
}

impl MockLookup {
    fn new(name: &'static str, domain: &'static str, response: MockResponse) -> Arc<Self> {
        Arc::new(Self {
            name,
            domain,
            delay: None,
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn with_delay(
        name: &'static str,
        domain: &'static str,
        delay: Duration,
        response: MockResponse,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            domain,
            delay: Some(delay),
            response,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DynLookup for MockLookup {
    fn name(&self) -> &'static str {
        self.name
    }

    fn domain(&self) -> &'static str {
        self.domain
    }

    fn lookup<'a>(
        &'a self,
        _entry: &'a Entry,
        ctx: &'a LookupContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Outcome> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Outcome::Timeout,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            match &self.response {
                MockResponse::Match { fields, score } => {
                    let mut entry = Entry::new("", "article");
                    for (name, value) in fields {
                        entry.set(name, value);
                    }
                    Outcome::Match(Candidate {
                        entry,
                        adapter: self.name,
                        source_url: format!("https://{}/mock", self.domain),
                        score: *score,
                    })
                }
                MockResponse::NoMatch => Outcome::NoMatch,
                MockResponse::HttpError(code) => Outcome::HttpError(*code),
                MockResponse::WaitForCancel => {
                    ctx.cancel.cancelled().await;
                    Outcome::Timeout
                }
            }
        })
    }
}

fn adapters(list: Vec<Arc<MockLookup>>) -> Vec<Arc<dyn DynLookup>> {
    list.into_iter().map(|a| a as Arc<dyn DynLookup>).collect()
}

fn entry(key: &str, fields: &[(&str, &str)]) -> Entry {
    let mut e = Entry::new(key, "article");
    for (name, value) in fields {
        e.set(name, value);
    }
    e
}

fn no_progress() -> Arc<dyn Fn(ProgressEvent) + Send + Sync> {
    Arc::new(|_| {})
}

#[tokio::test]
async fn no_match_leaves_the_entry_unchanged() {
    let mock = MockLookup::new("crossref", "api.crossref.org", MockResponse::NoMatch);
    let original = entry(
        "junk",
        &[("title", "156231.0649 404 nonexistant"), ("author", "No one")],
    );
    let before: Vec<(String, String)> = original
        .fields()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let results = complete_entries(
        vec![original],
        adapters(vec![mock.clone()]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results.len(), 1);
    let after: Vec<(String, String)> = results[0]
        .entry
        .fields()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(before, after);
    assert!(results[0].filled.is_empty());
    assert_eq!(results[0].report.results[0].outcome, "no-match");
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn accepted_matches_fill_missing_fields() {
    let mock = MockLookup::new(
        "crossref",
        "api.crossref.org",
        MockResponse::Match {
            fields: vec![
                ("title", "Reactive Path Deformation for Nonholonomic Mobile Robots"),
                ("doi", "10.1109/tro.2004.829459"),
                ("year", "2004"),
                ("pages", "967-977"),
            ],
            score: 999,
        },
    );
    let original = entry(
        "lamiraux04",
        &[
            ("title", "Reactive Path Deformation for Nonholonomic Mobile Robots"),
            ("author", "Lamiraux, F."),
            ("year", "2004"),
        ],
    );

    let results = complete_entries(
        vec![original],
        adapters(vec![mock]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    let result = &results[0];
    assert_eq!(result.entry.doi().as_deref(), Some("10.1109/tro.2004.829459"));
    assert_eq!(result.entry.get("pages"), Some("967-977"));
    // year was present and is kept
    assert_eq!(result.entry.get("year"), Some("2004"));
    let filled: Vec<&str> = result.filled.iter().map(|f| f.name.as_str()).collect();
    assert!(filled.contains(&"doi"));
    assert!(filled.contains(&"pages"));
    assert!(!filled.contains(&"year"));
}

#[tokio::test]
async fn merge_follows_adapter_priority_not_completion_order() {
    // The priority-first adapter answers last; its DOI must still win.
    let slow = MockLookup::with_delay(
        "crossref",
        "api.crossref.org",
        Duration::from_millis(80),
        MockResponse::Match {
            fields: vec![("doi", "10.1000/priority")],
            score: 900,
        },
    );
    let fast = MockLookup::new(
        "dblp",
        "dblp.org",
        MockResponse::Match {
            fields: vec![("doi", "10.1000/latecomer")],
            score: 900,
        },
    );

    let results = complete_entries(
        vec![entry("k", &[("title", "A Paper Title"), ("author", "Jones, J.")])],
        adapters(vec![slow, fast]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results[0].entry.doi().as_deref(), Some("10.1000/priority"));
}

#[tokio::test]
async fn certain_identifier_match_short_circuits_pending_adapters() {
    let certain = MockLookup::new(
        "crossref",
        "api.crossref.org",
        MockResponse::Match {
            fields: vec![("doi", "10.1109/tro.2004.829459")],
            score: CERTAIN_MATCH,
        },
    );
    // Would hang forever if the short-circuit did not cancel the entry.
    let stuck = MockLookup::new("dblp", "dblp.org", MockResponse::WaitForCancel);

    let config = EngineConfig {
        // Only identifier fields wanted: the short-circuit may fire.
        only_complete: Some(
            ["doi".to_string(), "url".to_string()]
                .into_iter()
                .collect::<BTreeSet<_>>(),
        ),
        ..Default::default()
    };

    let results = complete_entries(
        vec![entry("k", &[("title", "A Paper Title"), ("author", "Jones, J.")])],
        adapters(vec![certain, stuck.clone()]),
        Arc::new(config),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    let result = &results[0];
    assert_eq!(result.entry.doi().as_deref(), Some("10.1109/tro.2004.829459"));
    // The cancelled lookup reports as a timeout in telemetry.
    let dblp = result
        .report
        .results
        .iter()
        .find(|r| r.adapter == "dblp")
        .unwrap();
    assert_eq!(dblp.outcome, "no-response");
}

#[tokio::test]
async fn entry_budget_cancels_outstanding_lookups() {
    let stuck = MockLookup::new("crossref", "api.crossref.org", MockResponse::WaitForCancel);
    let config = EngineConfig {
        entry_budget: Some(Duration::from_millis(50)),
        ..Default::default()
    };

    let results = complete_entries(
        vec![entry("k", &[("title", "A Paper Title")])],
        adapters(vec![stuck]),
        Arc::new(config),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert!(results[0].filled.is_empty());
    assert_eq!(results[0].report.results[0].outcome, "no-response");
}

#[tokio::test]
async fn entries_without_query_data_skip_all_adapters() {
    let mock = MockLookup::new("crossref", "api.crossref.org", MockResponse::NoMatch);

    let results = complete_entries(
        vec![entry("untitled", &[("author", "Jones, John"), ("year", "2004")])],
        adapters(vec![mock.clone()]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(mock.calls(), 0);
    assert!(results[0].filled.is_empty());
    assert!(results[0].report.results.is_empty());
}

#[tokio::test]
async fn host_concurrency_above_one_still_reports_once_per_adapter() {
    // Several drainers share one adapter queue; each job must still be
    // processed exactly once.
    let mock = MockLookup::with_delay(
        "crossref",
        "api.crossref.org",
        Duration::from_millis(10),
        MockResponse::NoMatch,
    );
    let config = EngineConfig {
        host_concurrency: 3,
        ..Default::default()
    };
    let entries: Vec<Entry> = (0..6)
        .map(|i| entry(&format!("key{i}"), &[("title", "Some Shared Title Here")]))
        .collect();

    let results = complete_entries(
        entries,
        adapters(vec![mock.clone()]),
        Arc::new(config),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results.len(), 6);
    for result in &results {
        assert_eq!(result.report.results.len(), 1);
    }
    assert_eq!(mock.calls(), 6);
}

#[tokio::test]
async fn complete_entries_preserve_input_order() {
    let mock = MockLookup::new("crossref", "api.crossref.org", MockResponse::NoMatch);
    let entries: Vec<Entry> = (0..5)
        .map(|i| entry(&format!("key{i}"), &[("title", "Some Shared Title Here")]))
        .collect();

    let results = complete_entries(
        entries,
        adapters(vec![mock]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    let keys: Vec<&str> = results.iter().map(|r| r.entry.key.as_str()).collect();
    assert_eq!(keys, vec!["key0", "key1", "key2", "key3", "key4"]);
}

#[tokio::test]
async fn progress_fractions_are_monotonic() {
    let events: Arc<std::sync::Mutex<Vec<(f64, f64)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = events.clone();
    let progress: Arc<dyn Fn(ProgressEvent) + Send + Sync> = Arc::new(move |event| {
        if let ProgressEvent::EntryCompleted {
            entries_scanned,
            fields_filled,
            ..
        } = event
        {
            sink.lock().unwrap().push((entries_scanned, fields_filled));
        }
    });

    let mock = MockLookup::new(
        "crossref",
        "api.crossref.org",
        MockResponse::Match {
            fields: vec![("doi", "10.1000/1"), ("year", "2004")],
            score: 999,
        },
    );
    let entries: Vec<Entry> = (0..4)
        .map(|i| entry(&format!("key{i}"), &[("title", "Some Shared Title Here")]))
        .collect();

    complete_entries(
        entries,
        adapters(vec![mock]),
        Arc::new(EngineConfig::default()),
        progress,
        CancellationToken::new(),
    )
    .await;

    let seen = events.lock().unwrap();
    assert_eq!(seen.len(), 4);
    let mut prev = (0.0f64, 0.0f64);
    for &(scanned, filled) in seen.iter() {
        assert!(scanned >= prev.0);
        assert!(filled >= prev.1);
        prev = (scanned, filled);
    }
    assert!((seen.last().unwrap().0 - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn run_cancellation_drains_jobs_unchanged() {
    let stuck = MockLookup::new("crossref", "api.crossref.org", MockResponse::WaitForCancel);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = complete_entries(
        vec![entry("k", &[("title", "A Paper Title")])],
        adapters(vec![stuck]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        cancel,
    )
    .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].filled.is_empty());
}

#[tokio::test]
async fn network_failures_surface_in_telemetry() {
    let broken = MockLookup::new("crossref", "api.crossref.org", MockResponse::HttpError(503));

    let results = complete_entries(
        vec![entry("k", &[("title", "A Paper Title")])],
        adapters(vec![broken]),
        Arc::new(EngineConfig::default()),
        no_progress(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results[0].report.results[0].outcome, "no-response");
}

// ── Scoring against a real adapter record, no network ───────────────────

#[test]
fn exact_doi_candidate_scores_certain() {
    let record = serde_json::json!({
        "title": ["Reactive Path Deformation for Nonholonomic Mobile Robots"],
        "author": [{"given": "Florent", "family": "Lamiraux"}],
        "DOI": "10.1109/TRO.2004.829459",
        "issued": {"date-parts": [[2004]]}
    });
    let candidate = Crossref { mailto: None }.record_to_entry(record).unwrap();

    let local = entry(
        "lamiraux04",
        &[
            ("title", "Reactive path deformation for nonholonomic mobile robots"),
            ("doi", "10.1109/tro.2004.829459"),
        ],
    );
    assert!(match_score(&local, &candidate) >= CERTAIN_MATCH);
}

#[test]
fn missing_author_still_accepts_on_certain_title() {
    let record = serde_json::json!({
        "title": ["Reactive Path Deformation for Nonholonomic Mobile Robots"],
        "author": [{"given": "Florent", "family": "Lamiraux"}],
        "issued": {"date-parts": [[2004]]}
    });
    let candidate = Crossref { mailto: None }.record_to_entry(record).unwrap();

    let local = entry(
        "lamiraux04",
        &[("title", "Reactive path deformation for nonholonomic mobile robots")],
    );
    let score = match_score(&local, &candidate);
    assert!(score >= bibfill_bibtex::ACCEPT_MATCH);
}
