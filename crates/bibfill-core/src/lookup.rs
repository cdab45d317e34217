//! The lookup framework: one trait for the per-service glue, fixed engine
//! code for everything else.
//!
//! An [`Adapter`] declares how to build a request for a query shape and
//! how to turn one decoded record into an [`Entry`]. The engine owns the
//! rest: query-shape iteration, the HTTPS call with rate limiting and
//! retry, body decoding, candidate scoring, and best-candidate selection.
//!
//! A single adapter call walks this state machine:
//!
//! ```text
//!  INIT → REQUEST_SENT → {TIMEOUT, NET_ERROR, HTTP_ERROR(code), OK(body)}
//!  OK(body) → {DECODE_FAIL, NO_RECORDS, RECORDS(list)}
//!  RECORDS(list) → {NO_MATCH, MATCH(Candidate, score)}
//! ```
//!
//! Only `MATCH` feeds merging; every other terminal is telemetry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use bibfill_bibtex::matching::{self, ACCEPT_MATCH, match_score};
use bibfill_bibtex::Entry;

use crate::rate_limit::{BackoffPolicy, HostLimiter, SendError, send_with_backoff};

/// Search terms for one query shape: the plain title plus the joined
/// author last names (absent for the title-only shape).
#[derive(Debug, Clone)]
pub struct SearchTerms {
    pub title: String,
    pub authors: Option<String>,
}

/// The pieces an adapter contributes to one HTTPS request.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestParts {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Per-service glue over the lookup engine.
///
/// Implementations stay thin: declare the host, how a query shape maps to
/// a request, and how a raw record maps to an entry. Everything else is
/// fixed engine code.
pub trait Adapter: Send + Sync + 'static {
    /// One decoded API record.
    type Record: Send;

    fn name(&self) -> &'static str;

    /// Host to connect to; also the rate-limit key.
    fn domain(&self) -> &'static str;

    fn method(&self) -> reqwest::Method {
        reqwest::Method::GET
    }

    fn accept(&self) -> &'static str {
        "application/json"
    }

    /// Statuses that mean "no results" rather than failure (some APIs
    /// answer 404 for an unknown identifier).
    fn no_result_statuses(&self) -> &'static [u16] {
        &[]
    }

    /// Separator when joining author last names into a single query term.
    fn author_join(&self) -> &'static str {
        " "
    }

    /// Identifier-based request (DOI, arXiv id). Tried before any search
    /// shape; `None` when the entry carries no usable identifier.
    fn id_request(&self, _entry: &Entry) -> Option<RequestParts> {
        None
    }

    /// Search request for the given terms; `None` when this adapter
    /// cannot serve the shape (e.g. identifier-only services).
    fn search_request(&self, terms: &SearchTerms) -> Option<RequestParts>;

    /// Decode the body into records. `None` signals a decode failure;
    /// an empty vector signals a well-formed response with no results.
    fn extract_records(&self, body: &[u8]) -> Option<Vec<Self::Record>>;

    /// Convert one record into a candidate entry. `None` drops records
    /// missing the fields needed for scoring.
    fn record_to_entry(&self, record: Self::Record) -> Option<Entry>;
}

/// A scored candidate produced by one adapter.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Entry,
    pub adapter: &'static str,
    /// The request URL that produced this candidate, for diagnostics.
    pub source_url: String,
    pub score: i32,
}

impl Candidate {
    /// Whether this match is certain on an identifier (drives the
    /// dispatcher's short-circuit).
    pub fn is_certain(&self) -> bool {
        self.score >= matching::CERTAIN_MATCH
    }
}

/// Terminal state of one adapter call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Match(Candidate),
    /// Records were returned but none scored above the accept threshold.
    NoMatch,
    /// Well-formed responses with no records (or no query data at all).
    NoRecords,
    /// The server spoke the wrong dialect; not retried.
    DecodeFail,
    HttpError(u16),
    NetError(String),
    /// Timeouts and cancellations both land here.
    Timeout,
}

impl Outcome {
    /// Collapse to the telemetry outcome vocabulary.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Match(_) => "match",
            Outcome::NoMatch => "no-match",
            Outcome::NoRecords | Outcome::DecodeFail => "no-results",
            Outcome::HttpError(_) | Outcome::NetError(_) | Outcome::Timeout => "no-response",
        }
    }

    pub fn score(&self) -> Option<i32> {
        match self {
            Outcome::Match(c) => Some(c.score),
            _ => None,
        }
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Outcome::Match(c) => Some(c),
            _ => None,
        }
    }
}

/// Everything a lookup needs beyond the adapter: the shared client, the
/// admission gates, and the cancellation scope.
#[derive(Clone)]
pub struct LookupContext {
    pub client: reqwest::Client,
    pub timeout: Duration,
    pub user_agent: String,
    pub max_search_queries: usize,
    pub backoff: BackoffPolicy,
    /// Per-host governor; `None` in tests that exercise the engine alone.
    pub limiter: Option<Arc<HostLimiter>>,
    /// Global in-flight cap shared across all drainers.
    pub admission: Option<Arc<Semaphore>>,
    pub cancel: CancellationToken,
}

/// Object-safe surface the dispatcher drives.
pub trait DynLookup: Send + Sync {
    fn name(&self) -> &'static str;
    fn domain(&self) -> &'static str;
    fn lookup<'a>(
        &'a self,
        entry: &'a Entry,
        ctx: &'a LookupContext,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;
}

impl<A: Adapter> DynLookup for A {
    fn name(&self) -> &'static str {
        Adapter::name(self)
    }

    fn domain(&self) -> &'static str {
        Adapter::domain(self)
    }

    fn lookup<'a>(
        &'a self,
        entry: &'a Entry,
        ctx: &'a LookupContext,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(run_lookup(self, entry, ctx))
    }
}

/// Build the ordered request list for an entry: the identifier shape
/// first when available, then all-authors+title, each single author+title,
/// and title alone, capped at `max_search_queries`.
///
/// Both title and authors are checked for presence before being read; an
/// entry with no title contributes no search shapes at all.
fn build_requests<A: Adapter>(adapter: &A, entry: &Entry, cap: usize) -> Vec<RequestParts> {
    let mut requests = Vec::new();

    if let Some(parts) = adapter.id_request(entry) {
        requests.push(parts);
    }

    if let Some(title) = entry.title() {
        let title = title.to_string();
        let last_names: Vec<String> = entry
            .authors()
            .iter()
            .map(|a| a.last_name.clone())
            .collect();

        let push_terms = |terms: SearchTerms, requests: &mut Vec<RequestParts>| {
            if let Some(parts) = adapter.search_request(&terms) {
                requests.push(parts);
            }
        };

        if !last_names.is_empty() {
            push_terms(
                SearchTerms {
                    title: title.clone(),
                    authors: Some(last_names.join(adapter.author_join())),
                },
                &mut requests,
            );
        }
        if last_names.len() > 1 {
            for name in &last_names {
                push_terms(
                    SearchTerms {
                        title: title.clone(),
                        authors: Some(name.clone()),
                    },
                    &mut requests,
                );
            }
        }
        push_terms(
            SearchTerms {
                title,
                authors: None,
            },
            &mut requests,
        );
    }

    requests.truncate(cap.max(1));
    requests
}

async fn run_lookup<A: Adapter>(adapter: &A, entry: &Entry, ctx: &LookupContext) -> Outcome {
    let requests = build_requests(adapter, entry, ctx.max_search_queries);
    if requests.is_empty() {
        // Nothing to query with; the adapter is never invoked.
        return Outcome::NoRecords;
    }

    let mut saw_records = false;
    let mut saw_empty = false;
    let mut saw_decode_fail = false;
    let mut last_failure: Option<Outcome> = None;

    for parts in requests {
        if ctx.cancel.is_cancelled() {
            return Outcome::Timeout;
        }
        let url = build_url(Adapter::domain(adapter), &parts);
        tracing::debug!(adapter = Adapter::name(adapter), %url, "lookup request");

        match fetch(adapter, &url, &parts, ctx).await {
            Fetch::Body(bytes) => match adapter.extract_records(&bytes) {
                None => {
                    tracing::debug!(adapter = Adapter::name(adapter), "decode failure");
                    saw_decode_fail = true;
                }
                Some(records) if records.is_empty() => saw_empty = true,
                Some(records) => {
                    saw_records = true;
                    if let Some(best) = select_candidate(adapter, entry, records, &url) {
                        tracing::debug!(
                            adapter = Adapter::name(adapter),
                            score = best.score,
                            "accepted candidate"
                        );
                        return Outcome::Match(best);
                    }
                }
            },
            Fetch::NoResults => saw_empty = true,
            Fetch::Failure(outcome) => {
                // Network-level failures end the shape iteration: the
                // service is unhealthy, further shapes only add load.
                last_failure = Some(outcome);
                break;
            }
        }
    }

    if saw_records {
        Outcome::NoMatch
    } else if let Some(failure) = last_failure {
        failure
    } else if saw_empty {
        Outcome::NoRecords
    } else if saw_decode_fail {
        Outcome::DecodeFail
    } else {
        Outcome::NoRecords
    }
}

/// Score all records of one response and keep the best acceptable one.
/// Ties go to the candidate with more non-empty fields.
fn select_candidate<A: Adapter>(
    adapter: &A,
    entry: &Entry,
    records: Vec<A::Record>,
    url: &str,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for record in records {
        let Some(cand_entry) = adapter.record_to_entry(record) else {
            continue;
        };
        let score = match_score(entry, &cand_entry);
        if score < ACCEPT_MATCH {
            continue;
        }
        let replaces = match &best {
            None => true,
            Some(b) => matching::improves(score, &cand_entry, b.score, &b.entry),
        };
        if replaces {
            best = Some(Candidate {
                entry: cand_entry,
                adapter: Adapter::name(adapter),
                source_url: url.to_string(),
                score,
            });
        }
    }
    best
}

fn build_url(domain: &str, parts: &RequestParts) -> String {
    let mut url = format!("https://{}{}", domain, parts.path);
    if !parts.query.is_empty() {
        let encoded: Vec<String> = parts
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        url.push('?');
        url.push_str(&encoded.join("&"));
    }
    url
}

enum Fetch {
    Body(Vec<u8>),
    NoResults,
    Failure(Outcome),
}

async fn fetch<A: Adapter>(
    adapter: &A,
    url: &str,
    parts: &RequestParts,
    ctx: &LookupContext,
) -> Fetch {
    // Both gates must admit the request: the global in-flight cap first,
    // then the per-host governor inside send_with_backoff.
    let _permit = match &ctx.admission {
        Some(sem) => match sem.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return Fetch::Failure(Outcome::Timeout),
        },
        None => None,
    };

    let build = || {
        let mut req = ctx
            .client
            .request(adapter.method(), url)
            .header(reqwest::header::USER_AGENT, &ctx.user_agent)
            .header(reqwest::header::ACCEPT, adapter.accept())
            .timeout(ctx.timeout);
        if let Some(body) = &parts.body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        req
    };

    let resp = match send_with_backoff(
        build,
        ctx.limiter.as_deref(),
        &ctx.backoff,
        ctx.timeout,
        &ctx.cancel,
    )
    .await
    {
        Ok(resp) => resp,
        Err(SendError::Timeout) | Err(SendError::Cancelled) => {
            return Fetch::Failure(Outcome::Timeout);
        }
        Err(SendError::Net(msg)) => return Fetch::Failure(Outcome::NetError(msg)),
    };

    let status = resp.status().as_u16();
    if adapter.no_result_statuses().contains(&status) {
        return Fetch::NoResults;
    }
    if !resp.status().is_success() {
        return Fetch::Failure(Outcome::HttpError(status));
    }

    match resp.bytes().await {
        Ok(bytes) => Fetch::Body(bytes.to_vec()),
        Err(err) if err.is_timeout() => Fetch::Failure(Outcome::Timeout),
        Err(err) => Fetch::Failure(Outcome::NetError(err.to_string())),
    }
}

/// First `max` whitespace-separated words of a title, for APIs that do
/// poorly with very long query strings.
pub fn query_words(title: &str, max: usize) -> String {
    title
        .split_whitespace()
        .take(max)
        .collect::<Vec<_>>()
        .join(" ")
}
