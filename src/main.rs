mod collectors;
mod config;
mod evaluate;
mod metrics;
mod notify;
mod run;
mod snapshot;
mod store;

use clap::Parser;
use collectors::system::SystemProbes;
use collectors::Probes;
use config::Config;
use metrics::RunMetrics;
use notify::Transports;
use run::{run_once, RunOptions};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use store::SnapshotStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostwatch")]
#[command(version)]
#[command(about = "Single-shot host health check with state diffing against the previous run")]
struct Cli {
    #[arg(long, default_value = "./hostwatch.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
    /// Evaluate and log alerts without sending them or saving the snapshot.
    #[arg(long)]
    dry_run: bool,
    /// Append log lines to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    if let Err(err) = init_tracing(cli.log_file.as_ref()) {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }

    let mut probes = SystemProbes::new();
    let host = cfg
        .host_name
        .clone()
        .or_else(|| probes.host_name())
        .unwrap_or_else(|| "unknown-host".to_string());

    let transports = match Transports::from_config(&cfg, &host) {
        Ok(t) => t,
        Err(err) => {
            error!(error = %err, "failed to set up notification transports");
            std::process::exit(1);
        }
    };

    info!(
        host = %host,
        config = %cli.config,
        services = cfg.services.len(),
        ntp = cfg.ntp.enabled,
        transports_configured = !transports.is_empty(),
        dry_run = cli.dry_run,
        "starting hostwatch run"
    );

    let store = SnapshotStore::new(cfg.state.snapshot_path.clone());
    let now = now_unix();
    let opts = RunOptions {
        host,
        now_unix: now,
        dry_run: cli.dry_run,
    };

    let outcome = run_once(&cfg, &store, &mut probes, &transports, opts).await;

    if let Some(path) = &cfg.metrics.textfile_path {
        export_metrics(path, &outcome, &cfg, now);
    }

    match outcome {
        Ok(report) => {
            info!(
                host = %report.host,
                alerts = report.alerts.len(),
                baseline = report.had_baseline,
                degraded = report.is_degraded(),
                collector_errors = ?report.collector_errors,
                dispatch = ?report.dispatch,
                persist = ?report.persist,
                steps = ?report.steps,
                "hostwatch finished"
            );
        }
        Err(err) => {
            error!(error = %err, "hostwatch run failed");
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn export_metrics(
    path: &std::path::Path,
    outcome: &Result<run::RunReport, run::RunError>,
    cfg: &Config,
    now: i64,
) {
    let metrics = match RunMetrics::new() {
        Ok(m) => m,
        Err(err) => {
            warn!(error = %err, "failed to initialize metrics");
            return;
        }
    };
    match outcome {
        Ok(report) => {
            if let Err(err) = metrics.record_report(report, &cfg.thresholds.expected_time_zone) {
                warn!(error = %err, "failed to record run metrics");
                return;
            }
        }
        Err(_) => metrics.record_failure(now),
    }
    if let Err(err) = metrics.write_textfile(path) {
        warn!(path = %path.display(), error = %err, "failed to write metrics file");
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
