use crate::config::ThresholdsConfig;
use crate::snapshot::Snapshot;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    CpuUsage,
    MemoryUsage,
    DiskSpace,
    ServiceStatus,
    TimeDrift,
    TimeZone,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::CpuUsage => "cpu_usage",
            AlertKind::MemoryUsage => "memory_usage",
            AlertKind::DiskSpace => "disk_space",
            AlertKind::ServiceStatus => "service_status",
            AlertKind::TimeDrift => "time_drift",
            AlertKind::TimeZone => "time_zone",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub text: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Compares `current` against the static thresholds and, for service state,
/// against `previous`. Output order is fixed: CPU, memory, disks in
/// `current.disks` order, services in `current.services` order, drift, zone.
pub fn evaluate(
    current: &Snapshot,
    previous: Option<&Snapshot>,
    thresholds: &ThresholdsConfig,
) -> Vec<Alert> {
    let mut out = Vec::new();

    if current.cpu_percent >= thresholds.cpu_percent {
        out.push(Alert {
            kind: AlertKind::CpuUsage,
            text: format!(
                "CPU usage is {:.2}% (threshold {:.2}%)",
                current.cpu_percent, thresholds.cpu_percent
            ),
        });
    }

    if current.memory_percent >= thresholds.memory_percent {
        out.push(Alert {
            kind: AlertKind::MemoryUsage,
            text: format!(
                "Memory usage is {:.2}% (threshold {:.2}%)",
                current.memory_percent, thresholds.memory_percent
            ),
        });
    }

    for disk in &current.disks {
        if disk.free_percent <= thresholds.disk_free_percent {
            out.push(Alert {
                kind: AlertKind::DiskSpace,
                text: format!(
                    "Drive {} free space is {:.2}% (threshold {:.2}%)",
                    disk.drive_label, disk.free_percent, thresholds.disk_free_percent
                ),
            });
        }
    }

    // A service absent from the baseline is a first observation, not a change.
    if let Some(previous) = previous {
        for service in &current.services {
            let Some(before) = previous.service(&service.name) else {
                continue;
            };
            if before.status != service.status {
                out.push(Alert {
                    kind: AlertKind::ServiceStatus,
                    text: format!(
                        "Service {} changed status from {} to {}",
                        service.name, before.status, service.status
                    ),
                });
            }
        }
    }

    if let Some(drift) = current.time_drift_seconds {
        if drift.abs() > thresholds.time_drift_seconds {
            out.push(Alert {
                kind: AlertKind::TimeDrift,
                text: format!(
                    "Time drift is {:.1} seconds (threshold {:.1} seconds)",
                    drift, thresholds.time_drift_seconds
                ),
            });
        }
    }

    if current.time_zone_id != thresholds.expected_time_zone {
        out.push(Alert {
            kind: AlertKind::TimeZone,
            text: format!(
                "Time zone is {}, expected {}",
                current.time_zone_id, thresholds.expected_time_zone
            ),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DiskReading, ServiceReading, ServiceStatus};

    fn thresholds() -> ThresholdsConfig {
        ThresholdsConfig {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            disk_free_percent: 10.0,
            time_drift_seconds: 5.0,
            expected_time_zone: "UTC-06".to_string(),
        }
    }

    /// Every metric one step on the quiet side of its threshold.
    fn quiet_snapshot() -> Snapshot {
        Snapshot {
            timestamp: 1_760_000_000,
            cpu_percent: 89.0,
            memory_percent: 89.0,
            disks: vec![DiskReading {
                drive_label: "C:".to_string(),
                free_percent: 11.0,
            }],
            services: vec![
                ServiceReading {
                    name: "DB".to_string(),
                    status: ServiceStatus::Running,
                },
                ServiceReading {
                    name: "Spooler".to_string(),
                    status: ServiceStatus::Running,
                },
            ],
            time_drift_seconds: Some(4.0),
            time_zone_id: "UTC-06".to_string(),
        }
    }

    fn texts(alerts: &[Alert]) -> Vec<&str> {
        alerts.iter().map(|a| a.text.as_str()).collect()
    }

    #[test]
    fn quiet_snapshot_produces_nothing() {
        let s = quiet_snapshot();
        assert!(evaluate(&s, Some(&s), &thresholds()).is_empty());
        assert!(evaluate(&s, None, &thresholds()).is_empty());
    }

    #[test]
    fn no_service_alerts_without_baseline() {
        let mut s = quiet_snapshot();
        s.services[0].status = ServiceStatus::Stopped;
        s.services[1].status = ServiceStatus::NotFound;
        let alerts = evaluate(&s, None, &thresholds());
        assert!(alerts.iter().all(|a| a.kind != AlertKind::ServiceStatus));
    }

    #[test]
    fn cpu_boundary_is_inclusive() {
        let t = thresholds();
        let mut s = quiet_snapshot();

        s.cpu_percent = t.cpu_percent - 0.01;
        assert!(evaluate(&s, None, &t).is_empty());

        s.cpu_percent = t.cpu_percent;
        let alerts = evaluate(&s, None, &t);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CpuUsage);
    }

    #[test]
    fn memory_boundary_is_inclusive() {
        let t = thresholds();
        let mut s = quiet_snapshot();
        s.memory_percent = t.memory_percent;
        let alerts = evaluate(&s, None, &t);
        assert_eq!(texts(&alerts), ["Memory usage is 90.00% (threshold 90.00%)"]);
    }

    #[test]
    fn disk_boundary_is_inclusive() {
        let t = thresholds();
        let mut s = quiet_snapshot();
        s.disks[0].free_percent = t.disk_free_percent;
        let alerts = evaluate(&s, None, &t);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::DiskSpace);
        assert!(alerts[0].text.contains("C:"));

        s.disks[0].free_percent = t.disk_free_percent + 0.01;
        assert!(evaluate(&s, None, &t).is_empty());
    }

    #[test]
    fn service_change_names_both_statuses() {
        let previous = quiet_snapshot();
        let mut current = quiet_snapshot();
        current.services[0].status = ServiceStatus::Stopped;

        let alerts = evaluate(&current, Some(&previous), &thresholds());
        assert_eq!(
            texts(&alerts),
            ["Service DB changed status from Running to Stopped"]
        );
    }

    #[test]
    fn service_missing_from_baseline_is_not_a_change() {
        let mut previous = quiet_snapshot();
        previous.services.retain(|s| s.name != "Spooler");
        let mut current = quiet_snapshot();
        current.services[1].status = ServiceStatus::Stopped;

        assert!(evaluate(&current, Some(&previous), &thresholds()).is_empty());
    }

    #[test]
    fn cpu_value_formatted_with_two_decimals() {
        let mut s = quiet_snapshot();
        s.cpu_percent = 95.25;
        let alerts = evaluate(&s, None, &thresholds());
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].text.contains("95.25%"));
        assert!(!alerts[0].text.contains("95.250"));
    }

    #[test]
    fn zone_mismatch_without_drift() {
        let mut s = quiet_snapshot();
        s.time_zone_id = "UTC-05".to_string();
        s.time_drift_seconds = None;

        let alerts = evaluate(&s, None, &thresholds());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::TimeZone);
        assert_eq!(alerts[0].text, "Time zone is UTC-05, expected UTC-06");
    }

    #[test]
    fn zone_compare_is_exact() {
        let mut s = quiet_snapshot();
        s.time_zone_id = "utc-06".to_string();
        assert_eq!(evaluate(&s, None, &thresholds()).len(), 1);
    }

    #[test]
    fn drift_uses_absolute_value_and_strict_bound() {
        let t = thresholds();
        let mut s = quiet_snapshot();

        s.time_drift_seconds = Some(5.0);
        assert!(evaluate(&s, None, &t).is_empty());

        s.time_drift_seconds = Some(-7.26);
        let alerts = evaluate(&s, None, &t);
        assert_eq!(
            texts(&alerts),
            ["Time drift is -7.3 seconds (threshold 5.0 seconds)"]
        );
    }

    #[test]
    fn alerts_follow_fixed_order() {
        let previous = quiet_snapshot();
        let mut s = quiet_snapshot();
        s.cpu_percent = 99.0;
        s.memory_percent = 97.5;
        s.disks = vec![
            DiskReading {
                drive_label: "D:".to_string(),
                free_percent: 2.0,
            },
            DiskReading {
                drive_label: "C:".to_string(),
                free_percent: 5.0,
            },
        ];
        s.services[0].status = ServiceStatus::Stopped;
        s.services[1].status = ServiceStatus::Paused;
        s.time_drift_seconds = Some(12.0);
        s.time_zone_id = "UTC".to_string();

        let kinds: Vec<AlertKind> = evaluate(&s, Some(&previous), &thresholds())
            .iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            kinds,
            [
                AlertKind::CpuUsage,
                AlertKind::MemoryUsage,
                AlertKind::DiskSpace,
                AlertKind::DiskSpace,
                AlertKind::ServiceStatus,
                AlertKind::ServiceStatus,
                AlertKind::TimeDrift,
                AlertKind::TimeZone,
            ]
        );

        let alerts = evaluate(&s, Some(&previous), &thresholds());
        assert!(alerts[2].text.starts_with("Drive D:"));
        assert!(alerts[3].text.starts_with("Drive C:"));
        assert!(alerts[5].text.contains("Spooler"));
    }

    #[test]
    fn evaluation_is_repeatable_and_leaves_inputs_alone() {
        let previous = quiet_snapshot();
        let mut current = quiet_snapshot();
        current.cpu_percent = 93.1;
        current.services[0].status = ServiceStatus::StopPending;
        let before = (current.clone(), previous.clone());

        let first = evaluate(&current, Some(&previous), &thresholds());
        let second = evaluate(&current, Some(&previous), &thresholds());
        assert_eq!(first, second);
        assert_eq!((current, previous), before);
    }
}
