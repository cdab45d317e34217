//! Lookup engine for bibfill: turns incomplete BibTeX entries into
//! completed ones by querying bibliographic web services in parallel,
//! scoring candidate records, and merging accepted matches.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

pub mod adapters;
pub mod config_file;
pub mod dispatcher;
pub mod lookup;
pub mod merge;
pub mod rate_limit;
pub mod telemetry;

pub use bibfill_bibtex::Entry;
pub use dispatcher::{Dispatcher, EntryJob, EntryResult, complete_entries};
pub use lookup::{Adapter, Candidate, DynLookup, LookupContext, Outcome};
pub use rate_limit::{BackoffPolicy, HostLimiter, HostLimiters};
pub use telemetry::{AttemptReport, EntryReport, RunReport, Summary};

/// Default per-request connection/read timeout.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);
/// Default cap on search queries issued per (entry, adapter) pair.
pub const MAX_SEARCH_QUERIES: usize = 10;
/// Default global in-flight request cap.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;
/// Default in-flight request cap per host.
pub const DEFAULT_HOST_CONCURRENCY: usize = 1;
/// Default minimum inter-arrival delay between requests to one host.
pub const DEFAULT_HOST_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unknown adapter name: {0}")]
    UnknownAdapter(String),
}

/// Engine configuration shared by the dispatcher and every lookup.
#[derive(Clone)]
pub struct EngineConfig {
    /// Per-request timeout (connect + read).
    pub timeout: Duration,
    /// Optional wall-clock budget per entry; on expiry the entry's
    /// outstanding requests are cancelled.
    pub entry_budget: Option<Duration>,
    /// Global in-flight request cap.
    pub max_concurrent: usize,
    /// In-flight request cap per host; also sizes the connection pool.
    pub host_concurrency: usize,
    /// Minimum delay between two requests to the same host.
    pub host_delay: Duration,
    /// Cap on search queries per (entry, adapter) pair.
    pub max_search_queries: usize,
    /// Retry policy for transient failures.
    pub backoff: BackoffPolicy,
    /// Number of coordinator tasks feeding the drainers.
    pub num_coordinators: usize,
    /// Overwrite fields the source already has.
    pub force_overwrite: bool,
    /// Only these fields may be completed, when set.
    pub only_complete: Option<BTreeSet<String>>,
    /// Fields never to touch.
    pub dont_complete: BTreeSet<String>,
    /// Fields removed from every entry after merging.
    pub remove_fields: BTreeSet<String>,
    /// Contact address forwarded to polite-pool APIs (Crossref, OpenAlex).
    pub mailto: Option<String>,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: CONNECTION_TIMEOUT,
            entry_budget: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            host_concurrency: DEFAULT_HOST_CONCURRENCY,
            host_delay: DEFAULT_HOST_DELAY,
            max_search_queries: MAX_SEARCH_QUERIES,
            backoff: BackoffPolicy::default(),
            num_coordinators: 4,
            force_overwrite: false,
            only_complete: None,
            dont_complete: BTreeSet::new(),
            remove_fields: BTreeSet::new(),
            mailto: None,
            user_agent: format!(
                "bibfill/{} (https://github.com/bibfill/bibfill)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl EngineConfig {
    /// The set of fields a run may write, honoring `--only-complete` and
    /// `--dont-complete`.
    pub fn completable_fields(&self) -> BTreeSet<String> {
        bibfill_bibtex::field::FIELD_NAMES
            .iter()
            .map(|s| s.to_string())
            .filter(|name| match &self.only_complete {
                Some(only) => only.contains(name),
                None => true,
            })
            .filter(|name| !self.dont_complete.contains(name))
            .collect()
    }
}

/// Progress events emitted while a run is underway.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    EntryStarted {
        index: usize,
        total: usize,
        key: String,
    },
    /// One adapter finished its lookup for one entry.
    AttemptCompleted {
        index: usize,
        key: String,
        adapter: &'static str,
        outcome: String,
        elapsed: Duration,
    },
    /// An entry finalized; carries the two monotonic run fractions.
    EntryCompleted {
        index: usize,
        total: usize,
        key: String,
        filled: Vec<String>,
        entries_scanned: f64,
        fields_filled: f64,
    },
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.host_concurrency, 1);
        assert_eq!(config.host_delay, Duration::from_millis(100));
        assert_eq!(config.max_search_queries, 10);
        assert!(config.user_agent.starts_with("bibfill/"));
    }

    #[test]
    fn completable_fields_honors_filters() {
        let mut config = EngineConfig::default();
        config.dont_complete.insert("abstract".into());
        let fields = config.completable_fields();
        assert!(fields.contains("doi"));
        assert!(!fields.contains("abstract"));

        config.only_complete = Some(["doi".to_string(), "url".to_string()].into_iter().collect());
        let fields = config.completable_fields();
        assert_eq!(fields.len(), 2);
    }
}
