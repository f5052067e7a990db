use crate::collectors::{collect_snapshot, FatalCollectionError, Probes};
use crate::config::Config;
use crate::evaluate::{evaluate, Alert};
use crate::notify::{subject_for, Notifier};
use crate::snapshot::Snapshot;
use crate::store::{SnapshotStore, StoreError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Steps of a single run, in the order they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    Start,
    LoadPreviousState,
    CollectSnapshot,
    Evaluate,
    DispatchAlerts,
    PersistSnapshot,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No alerts fired.
    Skipped,
    Sent,
    Failed(String),
    DryRun,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Saved,
    /// Degraded run and `state.persist_degraded` is off; the previous snapshot stays.
    KeptPrevious,
    Failed(String),
    DryRun,
}

#[derive(Debug)]
pub struct RunReport {
    pub host: String,
    pub snapshot: Snapshot,
    pub had_baseline: bool,
    pub alerts: Vec<Alert>,
    pub failed_collectors: Vec<&'static str>,
    /// `collector: error` for each degraded field.
    pub collector_errors: Vec<String>,
    pub dispatch: DispatchOutcome,
    pub persist: PersistOutcome,
    pub steps: Vec<RunStep>,
}

impl RunReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed_collectors.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    FatalCollection(#[from] FatalCollectionError),
    #[error("snapshot not persisted: {0}")]
    Persist(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub host: String,
    pub now_unix: i64,
    /// Evaluate and log only: no dispatch, no persistence.
    pub dry_run: bool,
}

struct StepLog {
    steps: Vec<RunStep>,
}

impl StepLog {
    fn new() -> Self {
        Self {
            steps: vec![RunStep::Start],
        }
    }

    fn enter(&mut self, step: RunStep) {
        debug!(?step, "run step");
        self.steps.push(step);
    }
}

/// Executes one health-check run:
/// load previous state, collect, evaluate, dispatch (if any alerts), persist.
///
/// Only a fatal collection error, or a persistence error with
/// `state.fail_on_persist_error`, is returned as `Err`. Every other failure
/// is logged and recorded in the report.
pub async fn run_once<P: Probes, N: Notifier>(
    cfg: &Config,
    store: &SnapshotStore,
    probes: &mut P,
    notifier: &N,
    opts: RunOptions,
) -> Result<RunReport, RunError> {
    let mut log = StepLog::new();

    log.enter(RunStep::LoadPreviousState);
    let previous = store.load();
    if previous.is_none() {
        info!(path = %store.path().display(), "no usable previous snapshot, service changes are not evaluated this run");
    }

    log.enter(RunStep::CollectSnapshot);
    let collected = match collect_snapshot(probes, cfg, opts.now_unix).await {
        Ok(collected) => collected,
        Err(err) => {
            log.enter(RunStep::Failed);
            error!(error = %err, "collection failed, aborting run");
            return Err(err.into());
        }
    };
    let degraded = collected.is_degraded();
    let failed_collectors: Vec<&'static str> =
        collected.failures.iter().map(|f| f.collector).collect();
    let collector_errors: Vec<String> = collected
        .failures
        .iter()
        .map(|f| format!("{}: {}", f.collector, f.error))
        .collect();
    let snapshot = collected.snapshot;

    log.enter(RunStep::Evaluate);
    let alerts = evaluate(&snapshot, previous.as_ref(), &cfg.thresholds);
    for alert in &alerts {
        warn!(kind = alert.kind.as_str(), "{}", alert.text);
    }

    let dispatch = if alerts.is_empty() {
        DispatchOutcome::Skipped
    } else if opts.dry_run {
        info!(alerts = alerts.len(), "dry run, not dispatching");
        DispatchOutcome::DryRun
    } else {
        log.enter(RunStep::DispatchAlerts);
        let lines: Vec<String> = alerts.iter().map(|a| a.text.clone()).collect();
        match notifier.dispatch(&subject_for(&opts.host), &lines).await {
            Ok(()) => DispatchOutcome::Sent,
            Err(err) => {
                error!(error = %err, "failed to dispatch alerts, continuing to persist snapshot");
                DispatchOutcome::Failed(err.to_string())
            }
        }
    };

    log.enter(RunStep::PersistSnapshot);
    let persist = if opts.dry_run {
        PersistOutcome::DryRun
    } else if degraded && !cfg.state.persist_degraded && previous.is_some() {
        info!(failed = ?failed_collectors, "degraded run, keeping previous snapshot");
        PersistOutcome::KeptPrevious
    } else {
        match store.save(&snapshot) {
            Ok(()) => PersistOutcome::Saved,
            Err(err) => {
                error!(path = %store.path().display(), error = %err, "failed to persist snapshot");
                if cfg.state.fail_on_persist_error {
                    log.enter(RunStep::Failed);
                    return Err(RunError::Persist(err));
                }
                PersistOutcome::Failed(err.to_string())
            }
        }
    };

    log.enter(RunStep::Done);
    info!(
        alerts = alerts.len(),
        degraded,
        baseline = previous.is_some(),
        "run complete"
    );

    Ok(RunReport {
        host: opts.host,
        snapshot,
        had_baseline: previous.is_some(),
        alerts,
        failed_collectors,
        collector_errors,
        dispatch,
        persist,
        steps: log.steps,
    })
}
