//! The concurrent dispatcher: one coordinator pool feeding a set of
//! drainer tasks per adapter.
//!
//! Each adapter gets `host_concurrency` drainers (default 1) sharing one
//! queue, so per-host concurrency is bounded by construction and the
//! governor spaces successive requests to the host. A global semaphore
//! caps total in-flight requests. Per entry, a shared collector buffers
//! adapter results; the last drainer to report finalizes the entry,
//! merging accepted candidates in adapter priority order regardless of
//! completion order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bibfill_bibtex::Entry;

use crate::lookup::{Candidate, DynLookup, LookupContext, Outcome};
use crate::merge::{FilledField, MergePolicy, merge_entry};
use crate::rate_limit::HostLimiters;
use crate::telemetry::{AttemptReport, EntryReport};
use crate::{EngineConfig, ProgressEvent};

/// Fields that identify a record rather than describe it. A certain match
/// on an identifier short-circuits the remaining adapters unless other
/// fields are still missing.
const IDENTIFIER_FIELDS: &[&str] = &["doi", "url"];

/// A completion job for one entry.
pub struct EntryJob {
    pub entry: Entry,
    pub index: usize,
    pub total: usize,
    pub result_tx: oneshot::Sender<EntryResult>,
}

/// Final state of one entry after all adapters reported.
#[derive(Debug)]
pub struct EntryResult {
    pub index: usize,
    pub entry: Entry,
    pub filled: Vec<FilledField>,
    pub report: EntryReport,
}

impl EntryResult {
    pub fn changed(&self) -> bool {
        !self.filled.is_empty()
    }
}

/// Monotonic run accounting behind the two progress fractions.
pub struct RunCounters {
    total_entries: usize,
    missing_total: usize,
    entries_done: AtomicUsize,
    fields_filled: AtomicUsize,
}

impl RunCounters {
    pub fn new(total_entries: usize, missing_total: usize) -> Self {
        Self {
            total_entries,
            missing_total,
            entries_done: AtomicUsize::new(0),
            fields_filled: AtomicUsize::new(0),
        }
    }

    /// Record a finished entry; returns `(entries_scanned, fields_filled)`
    /// as fractions in `[0, 1]`.
    fn entry_done(&self, filled: usize) -> (f64, f64) {
        let done = self.entries_done.fetch_add(1, Ordering::AcqRel) + 1;
        let filled_total = self.fields_filled.fetch_add(filled, Ordering::AcqRel) + filled;
        let scanned = if self.total_entries == 0 {
            1.0
        } else {
            done as f64 / self.total_entries as f64
        };
        let filled_frac = if self.missing_total == 0 {
            1.0
        } else {
            (filled_total as f64 / self.missing_total as f64).min(1.0)
        };
        (scanned, filled_frac)
    }
}

type Progress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Pool of coordinator tasks plus one drainer per adapter.
pub struct Dispatcher {
    job_tx: async_channel::Sender<EntryJob>,
    pool_handle: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new(
        adapters: Vec<Arc<dyn DynLookup>>,
        config: Arc<EngineConfig>,
        progress: Progress,
        cancel: CancellationToken,
        counters: Arc<RunCounters>,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<EntryJob>();

        // The connection pool is keyed by host and holds at most
        // host_concurrency connections per host.
        let host_concurrency = config.host_concurrency.max(1);
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(host_concurrency)
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let limiters = HostLimiters::new(
            adapters.iter().map(|a| a.domain()),
            config.host_delay,
        );
        let admission = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        let adapter_names: Arc<Vec<&'static str>> =
            Arc::new(adapters.iter().map(|a| a.name()).collect());

        // host_concurrency drainers per adapter, sharing one queue and the
        // host's limiter. With more than one, requests pipeline when the
        // response time exceeds the governor interval.
        let mut drainer_txs: Vec<async_channel::Sender<DrainerJob>> = Vec::new();
        let mut drainer_handles: Vec<JoinHandle<()>> = Vec::new();
        for (slot, adapter) in adapters.into_iter().enumerate() {
            let (tx, rx) = async_channel::unbounded::<DrainerJob>();
            drainer_txs.push(tx);
            let ctx_template = LookupContext {
                client: client.clone(),
                timeout: config.timeout,
                user_agent: config.user_agent.clone(),
                max_search_queries: config.max_search_queries,
                backoff: config.backoff.clone(),
                limiter: limiters.get(adapter.domain()),
                admission: Some(admission.clone()),
                cancel: cancel.clone(),
            };
            for _ in 0..host_concurrency {
                drainer_handles.push(tokio::spawn(drainer_loop(
                    rx.clone(),
                    adapter.clone(),
                    slot,
                    ctx_template.clone(),
                )));
            }
        }
        let drainer_txs = Arc::new(drainer_txs);

        let num_coordinators = config.num_coordinators.max(1);
        let pool_handle = tokio::spawn(async move {
            let mut coord_handles = Vec::with_capacity(num_coordinators);
            for _ in 0..num_coordinators {
                coord_handles.push(tokio::spawn(coordinator_loop(
                    job_rx.clone(),
                    config.clone(),
                    progress.clone(),
                    cancel.clone(),
                    counters.clone(),
                    adapter_names.clone(),
                    drainer_txs.clone(),
                )));
            }
            drop(job_rx);

            for h in coord_handles {
                let _ = h.await;
            }

            // Last senders drop here; drainers drain their queues and exit.
            drop(drainer_txs);
            for h in drainer_handles {
                let _ = h.await;
            }
        });

        Self { job_tx, pool_handle }
    }

    pub async fn submit(&self, job: EntryJob) {
        let _ = self.job_tx.send(job).await;
    }

    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

// ── Collector ───────────────────────────────────────────────────────────

/// Per-entry aggregation hub shared by all drainers working on the entry.
/// The last drainer to decrement `remaining` finalizes.
struct EntryCollector {
    entry: Entry,
    index: usize,
    total: usize,
    /// True when fields beyond the identifiers are still missing; gates
    /// the certain-match short-circuit.
    nonid_missing: bool,
    remaining: AtomicUsize,
    certain: AtomicBool,
    state: Mutex<CollectState>,
    result_tx: Mutex<Option<oneshot::Sender<EntryResult>>>,
    progress: Progress,
    config: Arc<EngineConfig>,
    counters: Arc<RunCounters>,
    adapter_names: Arc<Vec<&'static str>>,
    /// Entry-scoped token: budget expiry and the short-circuit cancel it.
    cancel: CancellationToken,
}

struct CollectState {
    /// Accepted candidates by adapter slot; merged in slot order.
    slots: Vec<Option<Candidate>>,
    attempts: Vec<Option<AttemptReport>>,
}

struct DrainerJob {
    collector: Arc<EntryCollector>,
}

// ── Drainer ─────────────────────────────────────────────────────────────

async fn drainer_loop(
    rx: async_channel::Receiver<DrainerJob>,
    adapter: Arc<dyn DynLookup>,
    slot: usize,
    ctx_template: LookupContext,
) {
    while let Ok(job) = rx.recv().await {
        let collector = &job.collector;

        // Entry cancelled (run cancel, budget expiry, or short-circuit):
        // report a timeout without touching the network.
        let skip = collector.cancel.is_cancelled()
            || (collector.certain.load(Ordering::Acquire) && !collector.nonid_missing);
        if skip {
            tracing::debug!(
                adapter = adapter.name(),
                key = %collector.entry.key,
                "skipping cancelled or short-circuited lookup"
            );
            record_attempt(collector, slot, adapter.name(), Outcome::Timeout, None).await;
            continue;
        }

        let ctx = LookupContext {
            cancel: collector.cancel.clone(),
            ..ctx_template.clone()
        };

        let start = Instant::now();
        let outcome = adapter.lookup(&collector.entry, &ctx).await;
        let elapsed = start.elapsed();

        record_attempt(collector, slot, adapter.name(), outcome, Some(elapsed)).await;
    }
}

/// Store one adapter's outcome, fire the progress event, and finalize when
/// this was the last outstanding adapter.
async fn record_attempt(
    collector: &EntryCollector,
    slot: usize,
    adapter: &'static str,
    outcome: Outcome,
    elapsed: Option<std::time::Duration>,
) {
    (collector.progress)(ProgressEvent::AttemptCompleted {
        index: collector.index,
        key: collector.entry.key.clone(),
        adapter,
        outcome: outcome.kind().to_string(),
        elapsed: elapsed.unwrap_or_default(),
    });

    {
        let mut state = collector.state.lock().unwrap_or_else(|e| e.into_inner());
        state.attempts[slot] = Some(AttemptReport::from_outcome(adapter, &outcome));
        if let Outcome::Match(candidate) = outcome {
            // A certain identifier match lets pending adapters stand down
            // when nothing but identifiers is missing.
            if candidate.is_certain()
                && candidate.entry.doi().is_some()
                && !collector.nonid_missing
            {
                collector.certain.store(true, Ordering::Release);
                collector.cancel.cancel();
            }
            state.slots[slot] = Some(candidate);
        }
    }

    if collector.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        finalize_collector(collector).await;
    }
}

/// Merge buffered candidates in adapter-priority order and emit the result.
/// Runs exactly once, on whichever drainer decrements `remaining` to zero.
async fn finalize_collector(collector: &EntryCollector) {
    let (candidates, attempts) = {
        let mut state = collector.state.lock().unwrap_or_else(|e| e.into_inner());
        let slots = std::mem::take(&mut state.slots);
        let attempts = std::mem::take(&mut state.attempts);
        (slots, attempts)
    };

    let ordered: Vec<&Candidate> = candidates.iter().flatten().collect();
    let policy = MergePolicy {
        force_overwrite: collector.config.force_overwrite,
        only_complete: collector.config.only_complete.clone(),
        dont_complete: collector.config.dont_complete.clone(),
        remove_fields: collector.config.remove_fields.clone(),
    };
    let (merged, filled) = merge_entry(&collector.entry, &ordered, &policy);

    let results: Vec<AttemptReport> = attempts
        .into_iter()
        .enumerate()
        .map(|(slot, attempt)| {
            attempt.unwrap_or_else(|| {
                AttemptReport::from_outcome(collector.adapter_names[slot], &Outcome::Timeout)
            })
        })
        .collect();

    // Stop the budget timer; harmless if already cancelled.
    collector.cancel.cancel();

    emit_result(
        collector.index,
        collector.total,
        merged,
        filled,
        results,
        &collector.progress,
        &collector.counters,
        &collector.result_tx,
    );
}

/// Shared tail of both the lookup path and the nothing-to-do path.
#[allow(clippy::too_many_arguments)]
fn emit_result(
    index: usize,
    total: usize,
    entry: Entry,
    filled: Vec<FilledField>,
    results: Vec<AttemptReport>,
    progress: &Progress,
    counters: &RunCounters,
    result_tx: &Mutex<Option<oneshot::Sender<EntryResult>>>,
) {
    let (scanned, filled_frac) = counters.entry_done(filled.len());
    let key = entry.key.clone();

    tracing::info!(
        key = %key,
        filled = filled.len(),
        "entry completed"
    );

    (progress)(ProgressEvent::EntryCompleted {
        index,
        total,
        key: key.clone(),
        filled: filled.iter().map(|f| f.name.clone()).collect(),
        entries_scanned: scanned,
        fields_filled: filled_frac,
    });

    let report = EntryReport { key, results };
    let tx = result_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(tx) = tx {
        let _ = tx.send(EntryResult {
            index,
            entry,
            filled,
            report,
        });
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────

async fn coordinator_loop(
    job_rx: async_channel::Receiver<EntryJob>,
    config: Arc<EngineConfig>,
    progress: Progress,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
    adapter_names: Arc<Vec<&'static str>>,
    drainer_txs: Arc<Vec<async_channel::Sender<DrainerJob>>>,
) {
    while let Ok(job) = job_rx.recv().await {
        let EntryJob {
            entry,
            index,
            total,
            result_tx,
        } = job;

        progress(ProgressEvent::EntryStarted {
            index,
            total,
            key: entry.key.clone(),
        });

        let targets = config.completable_fields();
        let missing = if config.force_overwrite {
            targets
        } else {
            entry.fields_missing(&targets)
        };
        let has_query_data = entry.title().is_some() || entry.doi().is_some();

        // Nothing to fill, nothing to query with, no adapters left, or the
        // run was cancelled: pass the entry through untouched. Draining
        // keeps every submitted job's receiver resolvable.
        if cancel.is_cancelled() || missing.is_empty() || !has_query_data || drainer_txs.is_empty()
        {
            tracing::debug!(key = %entry.key, "no lookups needed");
            let result_tx = Mutex::new(Some(result_tx));
            emit_result(
                index,
                total,
                entry,
                Vec::new(),
                Vec::new(),
                &progress,
                &counters,
                &result_tx,
            );
            continue;
        }

        let nonid_missing = missing
            .iter()
            .any(|name| !IDENTIFIER_FIELDS.contains(&name.as_str()));

        let entry_cancel = cancel.child_token();
        if let Some(budget) = config.entry_budget {
            let timer_token = entry_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer_token.cancelled() => {}
                    _ = tokio::time::sleep(budget) => timer_token.cancel(),
                }
            });
        }

        let n = drainer_txs.len();
        let collector = Arc::new(EntryCollector {
            entry,
            index,
            total,
            nonid_missing,
            remaining: AtomicUsize::new(n),
            certain: AtomicBool::new(false),
            state: Mutex::new(CollectState {
                slots: vec![None; n],
                attempts: (0..n).map(|_| None).collect(),
            }),
            result_tx: Mutex::new(Some(result_tx)),
            progress: progress.clone(),
            config: config.clone(),
            counters: counters.clone(),
            adapter_names: adapter_names.clone(),
            cancel: entry_cancel,
        });

        for tx in drainer_txs.iter() {
            let _ = tx
                .send(DrainerJob {
                    collector: collector.clone(),
                })
                .await;
        }
    }
}

// ── Entry point ─────────────────────────────────────────────────────────

/// Run the full pipeline over a list of entries. Results come back in
/// input order; entries whose job was cancelled before finalizing are
/// returned unchanged.
pub async fn complete_entries(
    entries: Vec<Entry>,
    adapters: Vec<Arc<dyn DynLookup>>,
    config: Arc<EngineConfig>,
    progress: Progress,
    cancel: CancellationToken,
) -> Vec<EntryResult> {
    let total = entries.len();
    if total == 0 {
        return vec![];
    }

    // Memoized run totals for the progress fractions.
    let targets = config.completable_fields();
    let missing_total: usize = entries
        .iter()
        .map(|e| e.fields_missing(&targets).len())
        .sum();
    let counters = Arc::new(RunCounters::new(total, missing_total));

    let dispatcher = Dispatcher::new(
        adapters,
        config,
        progress,
        cancel.clone(),
        counters,
    );

    let mut receivers = Vec::with_capacity(total);
    let mut fallbacks: Vec<Option<Entry>> = Vec::with_capacity(total);
    for (index, entry) in entries.into_iter().enumerate() {
        let (result_tx, result_rx) = oneshot::channel();
        fallbacks.push(Some(entry.clone()));
        dispatcher
            .submit(EntryJob {
                entry,
                index,
                total,
                result_tx,
            })
            .await;
        receivers.push(result_rx);
    }

    let mut results: Vec<Option<EntryResult>> = Vec::with_capacity(total);
    for (index, rx) in receivers.into_iter().enumerate() {
        match rx.await {
            Ok(result) => results.push(Some(result)),
            Err(_) => {
                // Job dropped mid-cancellation: the entry passes through.
                let entry = fallbacks[index].take().unwrap_or_else(|| Entry::new("", "misc"));
                results.push(Some(EntryResult {
                    index,
                    entry,
                    filled: Vec::new(),
                    report: EntryReport {
                        key: String::new(),
                        results: Vec::new(),
                    },
                }));
            }
        }
    }

    dispatcher.shutdown().await;

    results.into_iter().flatten().collect()
}
