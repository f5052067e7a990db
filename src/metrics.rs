use crate::evaluate::AlertKind;
use crate::run::{DispatchOutcome, PersistOutcome, RunReport};
use crate::snapshot::ServiceStatus;
use crate::store::write_atomic;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics encoding failed: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to write metrics file: {0}")]
    Io(#[from] std::io::Error),
}

/// Gauges describing the outcome of one run, exported in the Prometheus text
/// format for node_exporter's textfile collector.
pub struct RunMetrics {
    registry: Registry,
    pub cpu_usage_percent: Gauge,
    pub memory_usage_percent: Gauge,
    pub disk_free_percent: GaugeVec,
    pub service_running: GaugeVec,
    pub time_drift_seconds: Gauge,
    pub time_zone_match: Gauge,
    pub alerts_fired: Gauge,
    pub alerts_by_kind: GaugeVec,
    pub collector_failed: GaugeVec,
    pub dispatch_success: Gauge,
    pub persist_success: Gauge,
    pub run_success: Gauge,
    pub last_run_timestamp_seconds: Gauge,
}

const ALERT_KINDS: [AlertKind; 6] = [
    AlertKind::CpuUsage,
    AlertKind::MemoryUsage,
    AlertKind::DiskSpace,
    AlertKind::ServiceStatus,
    AlertKind::TimeDrift,
    AlertKind::TimeZone,
];

impl RunMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_cpu_usage_percent",
            "CPU usage sampled this run in percent (0..100)"
        ))?;
        let memory_usage_percent = Gauge::with_opts(opts!(
            "hostwatch_memory_usage_percent",
            "Memory usage sampled this run in percent (0..100)"
        ))?;
        let disk_free_percent = GaugeVec::new(
            opts!("hostwatch_disk_free_percent", "Free space per fixed volume in percent"),
            &["drive"],
        )?;
        let service_running = GaugeVec::new(
            opts!(
                "hostwatch_service_running",
                "1 if the tracked service is running, 0 otherwise"
            ),
            &["service", "status"],
        )?;
        let time_drift_seconds = Gauge::with_opts(opts!(
            "hostwatch_time_drift_seconds",
            "Offset between the local clock and the NTP server"
        ))?;
        let time_zone_match = Gauge::with_opts(opts!(
            "hostwatch_time_zone_match",
            "1 if the host time zone equals the expected one"
        ))?;
        let alerts_fired = Gauge::with_opts(opts!(
            "hostwatch_alerts_fired",
            "Number of alerts produced by this run"
        ))?;
        let alerts_by_kind = GaugeVec::new(
            opts!("hostwatch_alerts_by_kind", "Alerts produced by this run per rule"),
            &["kind"],
        )?;
        let collector_failed = GaugeVec::new(
            opts!(
                "hostwatch_collector_failed",
                "1 if the collector failed this run and its field was degraded"
            ),
            &["collector"],
        )?;
        let dispatch_success = Gauge::with_opts(opts!(
            "hostwatch_dispatch_success",
            "1 if alerts were delivered or none were due"
        ))?;
        let persist_success = Gauge::with_opts(opts!(
            "hostwatch_persist_success",
            "1 if the snapshot was saved or intentionally kept"
        ))?;
        let run_success = Gauge::with_opts(opts!(
            "hostwatch_run_success",
            "1 if the run completed, 0 if it failed"
        ))?;
        let last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "hostwatch_last_run_timestamp_seconds",
            "Unix time of the last run"
        ))?;

        register(&registry, &run_success)?;
        register(&registry, &last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            cpu_usage_percent,
            memory_usage_percent,
            disk_free_percent,
            service_running,
            time_drift_seconds,
            time_zone_match,
            alerts_fired,
            alerts_by_kind,
            collector_failed,
            dispatch_success,
            persist_success,
            run_success,
            last_run_timestamp_seconds,
        })
    }

    /// Registers and sets the per-run readings. Gauges for values that were
    /// not measured (drift without NTP) stay unregistered and are not exported.
    pub fn record_report(
        &self,
        report: &RunReport,
        expected_time_zone: &str,
    ) -> Result<(), prometheus::Error> {
        let s = &report.snapshot;
        let registry = &self.registry;
        register(registry, &self.cpu_usage_percent)?;
        register(registry, &self.memory_usage_percent)?;
        register(registry, &self.disk_free_percent)?;
        register(registry, &self.service_running)?;
        register(registry, &self.time_zone_match)?;
        register(registry, &self.alerts_fired)?;
        register(registry, &self.alerts_by_kind)?;
        register(registry, &self.collector_failed)?;
        register(registry, &self.dispatch_success)?;
        register(registry, &self.persist_success)?;

        self.cpu_usage_percent.set(s.cpu_percent);
        self.memory_usage_percent.set(s.memory_percent);

        for disk in &s.disks {
            self.disk_free_percent
                .with_label_values(&[&disk.drive_label])
                .set(disk.free_percent);
        }
        for service in &s.services {
            let status = service.status.to_string();
            let running = if service.status == ServiceStatus::Running {
                1.0
            } else {
                0.0
            };
            self.service_running
                .with_label_values(&[&service.name, &status])
                .set(running);
        }
        if let Some(drift) = s.time_drift_seconds {
            register(registry, &self.time_drift_seconds)?;
            self.time_drift_seconds.set(drift);
        }
        self.time_zone_match
            .set(bool_gauge(s.time_zone_id == expected_time_zone));

        self.alerts_fired.set(report.alerts.len() as f64);
        for kind in ALERT_KINDS {
            let count = report.alerts.iter().filter(|a| a.kind == kind).count();
            self.alerts_by_kind
                .with_label_values(&[kind.as_str()])
                .set(count as f64);
        }
        for collector in &report.failed_collectors {
            self.collector_failed.with_label_values(&[*collector]).set(1.0);
        }

        self.dispatch_success.set(bool_gauge(matches!(
            report.dispatch,
            DispatchOutcome::Skipped | DispatchOutcome::Sent | DispatchOutcome::DryRun
        )));
        self.persist_success.set(bool_gauge(!matches!(
            report.persist,
            PersistOutcome::Failed(_)
        )));
        self.run_success.set(1.0);
        self.last_run_timestamp_seconds.set(s.timestamp as f64);
        Ok(())
    }

    /// Fatal run: only the outcome and the time are known.
    pub fn record_failure(&self, now_unix: i64) {
        self.run_success.set(0.0);
        self.last_run_timestamp_seconds.set(now_unix as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let encoded = self.encode_metrics()?;
        write_atomic(path, &encoded)?;
        Ok(())
    }
}

fn bool_gauge(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
