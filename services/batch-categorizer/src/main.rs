//! Batch Categorizer
//!
//! Single-binary runner that:
//! 1. Discovers input files that have no result yet
//! 2. Spreads them over one worker per (API key, model tier) pair
//! 3. Writes a JSON result per input, or a `_RAW.txt` side file when the
//!    model's answer cannot be parsed
//! 4. Logs progress and optionally serves /health, /status and /metrics
//!
//! Interrupt with Ctrl+C at any time; unfinished inputs are picked up by the
//! next run.

mod config;
mod discovery;
mod metrics;
mod output;
mod prompt;
mod reporter;
mod status_server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dispatch_pool::{CancellationToken, Dispatcher, RunSummary, TierSelection};
use provider::GeminiProvider;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::output::FsJobStore;
use crate::prompt::PromptTemplate;
use crate::status_server::StatusState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Categorize JSON link batches through the Gemini API.
#[derive(Debug, Parser)]
#[command(name = "batch-categorizer", version, about)]
struct Cli {
    /// Config file (falls back to CONFIG_PATH, then ./batch-categorizer.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tiers to run: pro, flash or both (overrides dispatch.mode)
    #[arg(long)]
    mode: Option<TierSelection>,

    /// Start flash workers once every pro key is exhausted
    #[arg(long)]
    fallback: bool,

    /// List outstanding jobs and exit
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let run_id = uuid::Uuid::new_v4().as_simple().to_string();
    run(cli, run_id.clone())
        .instrument(info_span!("run", run_id = %run_id))
        .await
}

async fn run(cli: Cli, run_id: String) -> Result<()> {
    info!("starting batch-categorizer");

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(mode) = cli.mode {
        config.dispatch.mode = mode;
    }
    if cli.fallback {
        config.dispatch.fallback_to_standard = true;
    }

    info!(
        base_url = %config.service.base_url,
        credentials = config.api_keys.len(),
        keys = ?config.api_keys.iter().map(|k| k.preview()).collect::<Vec<_>>(),
        mode = %config.dispatch.mode,
        fallback = config.dispatch.fallback_to_standard,
        "configuration loaded"
    );

    let layout = config.paths.layout()?;
    let raw_dir = config.paths.raw_dir.clone();
    let jobs = discovery::discover(&layout, raw_dir.as_deref()).context("failed to discover jobs")?;

    if cli.dry_run {
        for job in &jobs {
            info!(job = %job.id, destination = %job.destination().display(), "pending");
        }
        info!(pending = jobs.len(), "dry run, exiting");
        return Ok(());
    }
    if jobs.is_empty() {
        info!("no outstanding jobs, nothing to do");
        return Ok(());
    }

    let prometheus = metrics::install_recorder()?;

    let template = PromptTemplate::load(&config.paths.rules_file).with_context(|| {
        format!("failed to load rules from {}", config.paths.rules_file.display())
    })?;
    let store = FsJobStore::new(template, raw_dir);

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider = GeminiProvider::new(
        client,
        config.service.base_url.clone(),
        config.api_keys.clone(),
        config.tiers.models(),
        config.timeout(),
    );

    let dispatch_config = config.dispatch_config()?;
    anyhow::ensure!(
        provider.credential_count() == dispatch_config.credentials,
        "provider has {} keys but dispatch expects {}",
        provider.credential_count(),
        dispatch_config.credentials
    );

    let dispatcher = Dispatcher::new(
        dispatch_config,
        Arc::new(provider),
        Arc::new(store),
    )
    .context("failed to build dispatcher")?;

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("finishing in-flight calls; unfinished jobs stay pending for the next run");
        shutdown.cancel();
    });

    let total = jobs.len();
    let side_tasks = CancellationToken::new();

    let reporter = tokio::spawn(
        reporter::run(
            dispatcher.feed(),
            dispatcher.queue(),
            total,
            config.report_interval(),
            side_tasks.clone(),
        )
        .in_current_span(),
    );

    let server = config.status.listen_addr.map(|addr| {
        let state = StatusState {
            feed: dispatcher.feed(),
            queue: dispatcher.queue(),
            tracker: dispatcher.tracker(),
            prometheus: prometheus.clone(),
            run_id: run_id.clone(),
            total_jobs: total,
            started_at: Instant::now(),
        };
        tokio::spawn(status_server::serve(addr, state, side_tasks.clone()).in_current_span())
    });

    let summary = dispatcher.run(jobs).await;

    side_tasks.cancel();
    if let Err(e) = reporter.await {
        error!(error = %e, "progress reporter task failed");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "status endpoint error"),
            Err(e) => error!(error = %e, "status endpoint task failed"),
        }
    }
    reporter::report_once(&dispatcher.feed(), &dispatcher.queue(), total).await;

    if let Some(path) = &config.status.metrics_file {
        metrics::write_snapshot(&prometheus, path)?;
        info!(path = %path.display(), "metrics written");
    }

    log_summary(&summary);
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    info!(
        attempted = summary.attempted(),
        total = summary.total,
        done = summary.done,
        raw_saved = summary.raw_saved,
        failed = summary.failed,
        error = summary.error,
        pending = summary.pending,
        "run complete: {} of {} jobs attempted",
        summary.attempted(),
        summary.total
    );
    if !summary.exhausted.is_empty() {
        let exhausted: Vec<String> = summary.exhausted.iter().map(ToString::to_string).collect();
        warn!(identities = ?exhausted, "quota exhausted during run");
    }
    if summary.pending > 0 {
        warn!(pending = summary.pending, "jobs left pending; rerun to resume");
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "batch-categorizer",
            "--config",
            "/etc/bc.toml",
            "--mode",
            "pro",
            "--fallback",
            "--log-format",
            "pretty",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/bc.toml")));
        assert_eq!(cli.mode, Some(TierSelection::Pro));
        assert!(cli.fallback);
        assert!(!cli.dry_run);
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["batch-categorizer"]).unwrap();
        assert_eq!(cli.mode, None);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["batch-categorizer", "--mode", "ultra"]).is_err());
    }
}
