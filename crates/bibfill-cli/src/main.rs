//! bibfill - complete BibTeX bibliographies from online services.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use bibfill_bibtex::field::is_recognized;
use bibfill_bibtex::{Bibliography, Entry, read_file, write_bibliography};
use bibfill_core::adapters::{default_adapters, filter_adapters};
use bibfill_core::telemetry::RunReport;
use bibfill_core::{EngineConfig, EntryResult, complete_entries, config_file};

mod output;

use output::{ColorMode, ProgressPrinter, print_parse_issues, print_summary};

/// Complete BibTeX files by querying bibliographic web services.
#[derive(Parser, Debug)]
#[command(name = "bibfill", version, about, long_about = None)]
struct Cli {
    /// BibTeX files to complete
    #[arg(required = true, value_name = "FILE.bib")]
    files: Vec<PathBuf>,

    /// Write each completed file back to its input path
    #[arg(short = 'i', long)]
    inplace: bool,

    /// Write the completed bibliography to this path (single input only)
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Skip these services (repeatable)
    #[arg(long, value_name = "API")]
    dont_query: Vec<String>,

    /// Query only these services (repeatable)
    #[arg(long, value_name = "API")]
    only_query: Vec<String>,

    /// Never write these fields (repeatable)
    #[arg(long, value_name = "FIELD")]
    dont_complete: Vec<String>,

    /// Write only these fields (repeatable)
    #[arg(long, value_name = "FIELD")]
    only_complete: Vec<String>,

    /// Remove these fields from every entry after completion (repeatable)
    #[arg(long, value_name = "FIELD")]
    remove_fields: Vec<String>,

    /// Overwrite fields the source already has
    #[arg(short = 'f', long)]
    force_overwrite: bool,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Concurrent requests allowed per host
    #[arg(long, value_name = "N")]
    host_concurrency: Option<usize>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// No per-entry output, errors only
    #[arg(short, long)]
    quiet: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Write a JSON record of every lookup decision to this path
    #[arg(long, value_name = "PATH")]
    dump_data: Option<PathBuf>,
}

const EXIT_OK: u8 = 0;
const EXIT_PARSE_ERROR: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_NETWORK_ERROR: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "bibfill_core=info,bibfill_bibtex=info",
            2 => "bibfill_core=debug,bibfill_bibtex=debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let color = ColorMode(!cli.no_color);

    if cli.inplace && cli.output.is_some() {
        anyhow::bail!("--inplace and --output are mutually exclusive");
    }
    if cli.output.is_some() && cli.files.len() > 1 {
        anyhow::bail!("--output only works with a single input file");
    }
    for field in cli
        .dont_complete
        .iter()
        .chain(&cli.only_complete)
        .chain(&cli.remove_fields)
    {
        if !is_recognized(&field.to_lowercase()) {
            anyhow::bail!("unknown field name: {field}");
        }
    }

    // Flags > env > config file > defaults.
    let file_config = config_file::load_config();
    let network = file_config.network.unwrap_or_default();
    let lookups = file_config.lookups.unwrap_or_default();

    let mailto = std::env::var("BIBFILL_MAILTO").ok().or(network.mailto);
    let timeout_secs = cli.timeout.or(network.timeout_secs);
    if timeout_secs == Some(0) {
        anyhow::bail!("--timeout must be at least 1 second");
    }
    let host_concurrency = cli.host_concurrency.or(network.host_concurrency);
    if host_concurrency == Some(0) {
        anyhow::bail!("--host-concurrency must be at least 1");
    }

    let defaults = EngineConfig::default();
    let config = EngineConfig {
        timeout: timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
        host_delay: network
            .host_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.host_delay),
        max_concurrent: network.max_concurrent.unwrap_or(defaults.max_concurrent),
        host_concurrency: host_concurrency.unwrap_or(defaults.host_concurrency),
        force_overwrite: cli.force_overwrite,
        only_complete: (!cli.only_complete.is_empty()).then(|| to_field_set(&cli.only_complete)),
        dont_complete: to_field_set(&cli.dont_complete),
        remove_fields: to_field_set(&cli.remove_fields),
        mailto: mailto.clone(),
        ..defaults
    };

    let dont_query: Vec<String> = cli
        .dont_query
        .iter()
        .cloned()
        .chain(lookups.disabled.unwrap_or_default())
        .collect();
    let only_query: Vec<String> = if cli.only_query.is_empty() {
        lookups.only.unwrap_or_default()
    } else {
        cli.only_query.clone()
    };
    let adapters = filter_adapters(default_adapters(mailto), &only_query, &dont_query)?;
    if adapters.is_empty() {
        anyhow::bail!("every adapter is disabled, nothing to query");
    }

    // Read all inputs up front; unreadable files are fatal before any
    // lookup starts.
    let mut bibliographies: Vec<Bibliography> = Vec::with_capacity(cli.files.len());
    let mut parse_failures = false;
    for path in &cli.files {
        let bib = read_file(path)
            .map_err(|err| anyhow::anyhow!("cannot read {}: {err}", path.display()))?;
        if !bib.issues.is_empty() {
            parse_failures = true;
            print_parse_issues(&bib.issues, color);
        }
        bibliographies.push(bib);
    }

    let entries: Vec<Entry> = bibliographies
        .iter()
        .flat_map(|bib| bib.entries().cloned())
        .collect();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling outstanding lookups");
                cancel.cancel();
            }
        });
    }

    let printer = ProgressPrinter::new(color, cli.quiet);
    let started = Instant::now();
    let results = complete_entries(
        entries,
        adapters,
        Arc::new(config),
        printer.callback(),
        cancel,
    )
    .await;

    let report = RunReport::new(
        results.iter().map(|r| r.report.clone()).collect(),
        results.iter().map(|r| r.filled.len()).sum(),
        results.iter().filter(|r| r.changed()).count(),
        started.elapsed(),
    );

    // Fold completed entries back into their bibliographies, in order.
    let mut remaining: &[EntryResult] = &results;
    for bib in &mut bibliographies {
        let count = bib.entries().count();
        let (chunk, rest) = remaining.split_at(count.min(remaining.len()));
        remaining = rest;
        for (slot, result) in bib.entries_mut().zip(chunk) {
            *slot = result.entry.clone();
        }
    }

    write_outputs(&cli, &bibliographies)?;

    if let Some(path) = &cli.dump_data {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .map_err(|err| anyhow::anyhow!("cannot write {}: {err}", path.display()))?;
    }

    if !cli.quiet {
        print_summary(&results, &report, color);
    }

    Ok(if parse_failures {
        EXIT_PARSE_ERROR
    } else if report.all_network_failures() {
        EXIT_NETWORK_ERROR
    } else {
        EXIT_OK
    })
}

fn to_field_set(names: &[String]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_lowercase()).collect()
}

fn write_outputs(cli: &Cli, bibliographies: &[Bibliography]) -> anyhow::Result<()> {
    for (path, bib) in cli.files.iter().zip(bibliographies) {
        let rendered = write_bibliography(bib);
        if cli.inplace {
            std::fs::write(path, &rendered)
                .map_err(|err| anyhow::anyhow!("cannot write {}: {err}", path.display()))?;
        } else if let Some(output) = &cli.output {
            std::fs::write(output, &rendered)
                .map_err(|err| anyhow::anyhow!("cannot write {}: {err}", output.display()))?;
        } else {
            print!("{rendered}");
        }
    }
    Ok(())
}
