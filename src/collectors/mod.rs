pub mod ntp;
pub mod system;

use crate::config::Config;
use crate::snapshot::{clamp_percent, round2, DiskReading, ServiceReading, ServiceStatus, Snapshot};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// A single metric could not be read this run.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    #[error("time drift probe failed: {0}")]
    Ntp(#[from] ntp::NtpError),
    #[error("{0}")]
    Other(String),
}

/// CPU or memory counters could not be read; the run cannot continue.
#[derive(Debug, Error)]
#[error("core metrics unavailable: {collector}: {source}")]
pub struct FatalCollectionError {
    pub collector: &'static str,
    #[source]
    pub source: CollectError,
}

#[derive(Debug)]
pub struct CollectorFailure {
    pub collector: &'static str,
    pub error: CollectError,
}

#[derive(Debug)]
pub struct Collected {
    pub snapshot: Snapshot,
    pub failures: Vec<CollectorFailure>,
}

impl Collected {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Readers for each observed metric. `SystemProbes` is the host implementation.
#[allow(async_fn_in_trait)]
pub trait Probes {
    fn host_name(&self) -> Option<String>;
    async fn cpu_percent(&mut self) -> Result<f64, CollectError>;
    fn memory_percent(&mut self) -> Result<f64, CollectError>;
    fn disks(&mut self) -> Result<Vec<DiskReading>, CollectError>;
    /// Never fails; names the host does not know map to `NotFound`.
    async fn service_status(&self, name: &str) -> ServiceStatus;
    async fn time_zone_id(&self) -> String;
    async fn time_drift(&self, cfg: &crate::config::NtpConfig) -> Result<f64, CollectError>;
}

pub async fn collect_snapshot<P: Probes>(
    probes: &mut P,
    cfg: &Config,
    now_unix: i64,
) -> Result<Collected, FatalCollectionError> {
    let cpu = probes
        .cpu_percent()
        .await
        .map_err(|source| FatalCollectionError {
            collector: "cpu",
            source,
        })?;
    let memory = probes
        .memory_percent()
        .map_err(|source| FatalCollectionError {
            collector: "memory",
            source,
        })?;

    let mut failures = Vec::new();

    let disks = match probes.disks() {
        Ok(disks) => dedup_disks(disks),
        Err(err) => {
            warn!(collector = "disks", error = %err, "disk readings unavailable, skipping disk checks");
            failures.push(CollectorFailure {
                collector: "disks",
                error: err,
            });
            Vec::new()
        }
    };

    let mut services = Vec::with_capacity(cfg.services.len());
    for name in &cfg.services {
        services.push(ServiceReading {
            name: name.clone(),
            status: probes.service_status(name).await,
        });
    }

    let time_drift_seconds = if cfg.ntp.enabled {
        match probes.time_drift(&cfg.ntp).await {
            Ok(drift) if drift.is_finite() => Some(round2(drift)),
            Ok(drift) => {
                let err = CollectError::Other(format!("non-finite drift {drift}"));
                warn!(collector = "ntp", error = %err, "time drift unavailable");
                failures.push(CollectorFailure {
                    collector: "ntp",
                    error: err,
                });
                None
            }
            Err(err) => {
                warn!(collector = "ntp", server = %cfg.ntp.server, error = %err, "time drift unavailable");
                failures.push(CollectorFailure {
                    collector: "ntp",
                    error: err,
                });
                None
            }
        }
    } else {
        None
    };

    let snapshot = Snapshot {
        timestamp: now_unix,
        cpu_percent: round2(clamp_percent(cpu)),
        memory_percent: round2(clamp_percent(memory)),
        disks,
        services,
        time_drift_seconds,
        time_zone_id: probes.time_zone_id().await,
    };

    Ok(Collected { snapshot, failures })
}

fn dedup_disks(disks: Vec<DiskReading>) -> Vec<DiskReading> {
    let mut seen = HashSet::new();
    disks
        .into_iter()
        .filter(|d| seen.insert(d.drive_label.clone()))
        .map(|d| DiskReading {
            drive_label: d.drive_label,
            free_percent: round2(clamp_percent(d.free_percent)),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use std::collections::HashMap;

    /// Scripted probe results for exercising collection and the run loop.
    pub(crate) struct FakeProbes {
        pub cpu: Option<f64>,
        pub memory: Option<f64>,
        pub disks: Option<Vec<DiskReading>>,
        pub services: HashMap<String, ServiceStatus>,
        pub drift: Option<f64>,
        pub time_zone: String,
    }

    impl Default for FakeProbes {
        fn default() -> Self {
            Self {
                cpu: Some(10.0),
                memory: Some(20.0),
                disks: Some(vec![DiskReading {
                    drive_label: "/".to_string(),
                    free_percent: 50.0,
                }]),
                services: HashMap::new(),
                drift: Some(0.25),
                time_zone: "UTC".to_string(),
            }
        }
    }

    impl Probes for FakeProbes {
        fn host_name(&self) -> Option<String> {
            Some("fake-host".to_string())
        }

        async fn cpu_percent(&mut self) -> Result<f64, CollectError> {
            self.cpu.ok_or(CollectError::Unavailable("cpu counters"))
        }

        fn memory_percent(&mut self) -> Result<f64, CollectError> {
            self.memory.ok_or(CollectError::Unavailable("memory counters"))
        }

        fn disks(&mut self) -> Result<Vec<DiskReading>, CollectError> {
            self.disks
                .clone()
                .ok_or(CollectError::Unavailable("fixed volumes"))
        }

        async fn service_status(&self, name: &str) -> ServiceStatus {
            self.services
                .get(name)
                .copied()
                .unwrap_or(ServiceStatus::NotFound)
        }

        async fn time_zone_id(&self) -> String {
            self.time_zone.clone()
        }

        async fn time_drift(&self, _cfg: &crate::config::NtpConfig) -> Result<f64, CollectError> {
            self.drift.ok_or(CollectError::Ntp(ntp::NtpError::Timeout(3000)))
        }
    }

    fn ntp_config() -> Config {
        let mut cfg = valid_config();
        cfg.ntp.enabled = true;
        cfg
    }

    #[tokio::test]
    async fn healthy_collection_is_not_degraded() {
        let mut probes = FakeProbes::default();
        probes.cpu = Some(33.3333);
        probes
            .services
            .insert("DB".to_string(), ServiceStatus::Running);

        let collected = collect_snapshot(&mut probes, &ntp_config(), 42).await.unwrap();
        assert!(!collected.is_degraded());
        let s = collected.snapshot;
        assert_eq!(s.timestamp, 42);
        assert_eq!(s.cpu_percent, 33.33);
        assert_eq!(s.time_drift_seconds, Some(0.25));
        assert_eq!(s.time_zone_id, "UTC");
    }

    #[tokio::test]
    async fn drift_is_rounded_like_other_readings() {
        let mut probes = FakeProbes::default();
        probes.drift = Some(0.1 + 0.2);
        let collected = collect_snapshot(&mut probes, &ntp_config(), 0).await.unwrap();
        assert_eq!(collected.snapshot.time_drift_seconds, Some(0.3));

        probes.drift = Some(-1.23456789);
        let collected = collect_snapshot(&mut probes, &ntp_config(), 0).await.unwrap();
        assert_eq!(collected.snapshot.time_drift_seconds, Some(-1.23));
    }

    #[tokio::test]
    async fn services_follow_config_order_and_default_to_not_found() {
        let mut probes = FakeProbes::default();
        probes
            .services
            .insert("cron".to_string(), ServiceStatus::Stopped);

        let collected = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap();
        let services: Vec<(&str, ServiceStatus)> = collected
            .snapshot
            .services
            .iter()
            .map(|s| (s.name.as_str(), s.status))
            .collect();
        assert_eq!(
            services,
            [("DB", ServiceStatus::NotFound), ("cron", ServiceStatus::Stopped)]
        );
    }

    #[tokio::test]
    async fn drift_failure_degrades_only_that_field() {
        let mut probes = FakeProbes::default();
        probes.drift = None;

        let collected = collect_snapshot(&mut probes, &ntp_config(), 0).await.unwrap();
        assert!(collected.is_degraded());
        assert_eq!(collected.failures.len(), 1);
        assert_eq!(collected.failures[0].collector, "ntp");
        assert_eq!(collected.snapshot.time_drift_seconds, None);
        assert_eq!(collected.snapshot.disks.len(), 1);
    }

    #[tokio::test]
    async fn disabled_ntp_leaves_drift_absent_without_failure() {
        let mut probes = FakeProbes::default();
        let collected = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap();
        assert!(!collected.is_degraded());
        assert_eq!(collected.snapshot.time_drift_seconds, None);
    }

    #[tokio::test]
    async fn disk_failure_degrades_to_empty_list() {
        let mut probes = FakeProbes::default();
        probes.disks = None;

        let collected = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap();
        assert_eq!(collected.failures[0].collector, "disks");
        assert!(collected.snapshot.disks.is_empty());
    }

    #[tokio::test]
    async fn cpu_or_memory_failure_is_fatal() {
        let mut probes = FakeProbes::default();
        probes.cpu = None;
        let err = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap_err();
        assert_eq!(err.collector, "cpu");

        let mut probes = FakeProbes::default();
        probes.memory = None;
        let err = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap_err();
        assert_eq!(err.collector, "memory");
    }

    #[tokio::test]
    async fn duplicate_drive_labels_keep_first() {
        let mut probes = FakeProbes::default();
        probes.disks = Some(vec![
            DiskReading {
                drive_label: "C:".to_string(),
                free_percent: 12.346,
            },
            DiskReading {
                drive_label: "C:".to_string(),
                free_percent: 90.0,
            },
        ]);

        let collected = collect_snapshot(&mut probes, &valid_config(), 0).await.unwrap();
        assert_eq!(
            collected.snapshot.disks,
            [DiskReading {
                drive_label: "C:".to_string(),
                free_percent: 12.35,
            }]
        );
    }
}
