//! cvsync - cultivar record enrichment and audits
//!
//! Runs one job over the dataset, persisting progress as it goes. Re-run with
//! `--resume` after an interruption to continue from the checkpoint.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cvsync_common::config::RootFolderResolver;
use cvsync_enrich::config::{resolve_path, CliOverrides, EnrichConfig};
use cvsync_enrich::dataset::{load_name_list, load_records, Record};
use cvsync_enrich::fetch::ReqwestFetcher;
use cvsync_enrich::jobs::{build_scheduler, Job};
use cvsync_enrich::pipeline::{Aggregator, RunOptions};
use cvsync_enrich::progress::{CommandSink, LogSink};
use cvsync_enrich::report::write_reports;
use cvsync_enrich::store::{JsonFileStore, StorePaths};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter when `RUST_LOG` is unset; covers every workspace crate
const DEFAULT_LOG_FILTER: &str = "cvsync=info,cvsync_enrich=info,cvsync_common=info";

#[derive(Parser, Debug)]
#[command(name = "cvsync")]
#[command(about = "Resumable multi-source enrichment of cultivar records")]
#[command(version)]
struct Args {
    /// Root folder (dataset, state and reports live below it)
    #[arg(long, env = "CVSYNC_ROOT")]
    root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "CVSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Dataset JSON (overrides the configured path)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Maximum requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Continue from the saved checkpoint and cache
    #[arg(long)]
    resume: bool,

    /// Stop after this many units
    #[arg(long)]
    max_units: Option<usize>,

    /// Re-probe units whose cached outcome is an error
    #[arg(long)]
    retry_errors: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find image URLs for records without one
    Images,
    /// Audit record names against the ICR name search
    MatchAudit {
        /// Name list (JSON array or one per line) instead of dataset names
        #[arg(long)]
        names: Option<PathBuf>,
    },
    /// Validate and recover ACS encyclopedia links
    LinkAudit,
    /// Fill ACS links from the encyclopedia catalog by exact name
    Backfill,
    /// Collect Chinese names from ICR detail pages
    ChineseNames,
}

impl Command {
    fn job(&self) -> Job {
        match self {
            Command::Images => Job::Images,
            Command::MatchAudit { .. } => Job::MatchAudit,
            Command::LinkAudit => Job::LinkAudit,
            Command::Backfill => Job::Backfill,
            Command::ChineseNames => Job::ChineseNames,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let job = args.command.job();

    let config = EnrichConfig::resolve(
        args.config.as_deref(),
        &CliOverrides {
            concurrency: args.concurrency,
            max_units: args.max_units,
            retry_errors: args.retry_errors,
        },
    )
    .context("Failed to load configuration")?;

    let root = RootFolderResolver::new()
        .with_cli_arg(args.root.clone())
        .with_config_value(config.root_folder.clone())
        .resolve();
    info!(job = %job, root = %root.display(), "Starting cvsync v{}", env!("CARGO_PKG_VERSION"));

    let records = match &args.command {
        Command::MatchAudit { names: Some(path) } => load_name_list(path)
            .with_context(|| format!("Failed to read name list {}", path.display()))?
            .into_iter()
            .map(Record::named)
            .collect(),
        _ => {
            let dataset = resolve_path(&root, args.dataset.as_deref().unwrap_or(config.dataset.as_path()));
            load_records(&dataset).context("Failed to load dataset")?
        }
    };
    let units = job.units(&records);

    let scheduler = Arc::new(build_scheduler(&config));
    let fetcher = Arc::new(ReqwestFetcher::new().context("Failed to build HTTP client")?);
    let chain = Arc::new(job.chain(&config, &root, scheduler, fetcher)?);

    let namespace = job.namespace();
    let state_dir = resolve_path(&root, &config.state_dir);
    let mut paths = StorePaths::in_dir(&state_dir, namespace);
    if let Some(mirror_dir) = &config.mirror_dir {
        let mirror = resolve_path(&root, mirror_dir).join(format!("{}_checkpoint.json", namespace));
        paths = paths.with_mirror(mirror);
    }
    let store = JsonFileStore::new(paths);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight units");
            interrupt.cancel();
        }
    });

    let mut aggregator = Aggregator::new(job.name(), job.keying(), chain, store)
        .with_options(RunOptions {
            resume: args.resume,
            max_units: config.max_units(),
            retry_errors: config.retry_errors,
        })
        .with_progress(config.progress.every_n, config.progress_interval())
        .with_sink(Arc::new(LogSink))
        .with_cancel(cancel);
    if let Some(sink) = CommandSink::from_command(&config.progress.command) {
        aggregator = aggregator.with_sink(Arc::new(sink));
    }

    let report = aggregator.run(units).await?;

    let report_dir = resolve_path(&root, &config.report_dir);
    let paths = write_reports(&report, &report_dir, namespace)?;
    info!(summary = %paths.summary_text.display(), "Summary written");

    if report.interrupted {
        warn!(
            next_index = report.next_index,
            total = report.total_units,
            "Run interrupted; re-run with --resume to continue"
        );
    }

    Ok(())
}
