//! Run telemetry: per-entry lookup outcomes and the final aggregate,
//! serializable as the `--dump-data` JSON document.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::lookup::Outcome;

/// One adapter's terminal state for one entry.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub adapter: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<BTreeMap<String, String>>,
}

impl AttemptReport {
    pub fn from_outcome(adapter: &str, outcome: &Outcome) -> Self {
        Self {
            adapter: adapter.to_string(),
            outcome: outcome.kind().to_string(),
            score: outcome.score(),
            candidate: outcome.candidate().map(|c| {
                c.entry
                    .fields()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
        }
    }

    pub fn is_network_failure(&self) -> bool {
        self.outcome == "no-response"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub key: String,
    pub results: Vec<AttemptReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub entries: usize,
    pub entries_changed: usize,
    pub fields_filled: usize,
    pub matches: usize,
    pub no_matches: usize,
    pub network_failures: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub entries: Vec<EntryReport>,
    pub summary: Summary,
}

impl RunReport {
    pub fn new(entries: Vec<EntryReport>, fields_filled: usize, changed: usize, elapsed: Duration) -> Self {
        let mut summary = Summary {
            entries: entries.len(),
            entries_changed: changed,
            fields_filled,
            elapsed_ms: elapsed.as_millis() as u64,
            ..Default::default()
        };
        for entry in &entries {
            for attempt in &entry.results {
                match attempt.outcome.as_str() {
                    "match" => summary.matches += 1,
                    "no-response" => summary.network_failures += 1,
                    _ => summary.no_matches += 1,
                }
            }
        }
        Self { entries, summary }
    }

    /// True when every attempt of the run died on the network: the signal
    /// for the "all lookups failed" exit code.
    pub fn all_network_failures(&self) -> bool {
        let total: usize = self.entries.iter().map(|e| e.results.len()).sum();
        total > 0 && self.summary.network_failures == total
    }
}
