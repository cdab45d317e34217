//! Terminal output: streaming per-entry summaries and the final aggregate.
//!
//! Everything here writes to stderr so the completed bibliography can go
//! to stdout unpolluted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use owo_colors::OwoColorize;

use bibfill_core::{EntryResult, ProgressEvent, RunReport};

/// Whether to colorize terminal output.
#[derive(Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Streams one line per completed entry:
/// `[key] filled: {doi, url}; queried: crossref:match dblp:no-match`
pub struct ProgressPrinter {
    color: ColorMode,
    quiet: bool,
    attempts: Mutex<HashMap<usize, Vec<(String, String)>>>,
}

impl ProgressPrinter {
    pub fn new(color: ColorMode, quiet: bool) -> Arc<Self> {
        Arc::new(Self {
            color,
            quiet,
            attempts: Mutex::new(HashMap::new()),
        })
    }

    pub fn callback(self: &Arc<Self>) -> Arc<dyn Fn(ProgressEvent) + Send + Sync> {
        let printer = self.clone();
        Arc::new(move |event| printer.handle(event))
    }

    fn handle(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::EntryStarted { .. } => {}
            ProgressEvent::AttemptCompleted {
                index,
                adapter,
                outcome,
                ..
            } => {
                let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
                attempts
                    .entry(index)
                    .or_default()
                    .push((adapter.to_string(), outcome));
            }
            ProgressEvent::EntryCompleted {
                index,
                key,
                filled,
                entries_scanned,
                ..
            } => {
                let attempts = {
                    let mut map = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
                    map.remove(&index).unwrap_or_default()
                };
                if self.quiet {
                    return;
                }
                let queried = attempts
                    .iter()
                    .map(|(adapter, outcome)| format!("{adapter}:{outcome}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let filled = if filled.is_empty() {
                    "-".to_string()
                } else {
                    format!("{{{}}}", filled.join(", "))
                };

                let line = format!(
                    "[{key}] filled: {filled}; queried: {queried} ({:.0}%)",
                    entries_scanned * 100.0
                );
                if self.color.enabled() {
                    if filled == "-" {
                        eprintln!("{}", line.dimmed());
                    } else {
                        eprintln!("{}", line.green());
                    }
                } else {
                    eprintln!("{line}");
                }
            }
        }
    }
}

/// Parse warnings for entries carried through verbatim.
pub fn print_parse_issues(issues: &[bibfill_bibtex::ParseIssue], color: ColorMode) {
    for issue in issues {
        if color.enabled() {
            eprintln!("{}", format!("warning: {issue}").yellow());
        } else {
            eprintln!("warning: {issue}");
        }
    }
}

/// The final aggregate line.
pub fn print_summary(results: &[EntryResult], report: &RunReport, color: ColorMode) {
    let changed = results.iter().filter(|r| r.changed()).count();
    let line = format!(
        "{} entries, {} changed, {} fields filled; lookups: {} matched, {} without match, {} failed",
        report.summary.entries,
        changed,
        report.summary.fields_filled,
        report.summary.matches,
        report.summary.no_matches,
        report.summary.network_failures,
    );
    if color.enabled() {
        eprintln!("{}", line.bold());
    } else {
        eprintln!("{line}");
    }
}
