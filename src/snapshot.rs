use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One run's observations. Built by the collectors, read by the evaluator and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Snapshot {
    #[serde(with = "rfc3339_seconds")]
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disks: Vec<DiskReading>,
    pub services: Vec<ServiceReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_drift_seconds: Option<f64>,
    pub time_zone_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiskReading {
    pub drive_label: String,
    pub free_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceReading {
    pub name: String,
    pub status: ServiceStatus,
}

/// Service controller states, plus `NotFound` for names the host does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    Running,
    Stopped,
    StartPending,
    StopPending,
    ContinuePending,
    PausePending,
    Paused,
    Failed,
    NotFound,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Running => "Running",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::StartPending => "StartPending",
            ServiceStatus::StopPending => "StopPending",
            ServiceStatus::ContinuePending => "ContinuePending",
            ServiceStatus::PausePending => "PausePending",
            ServiceStatus::Paused => "Paused",
            ServiceStatus::Failed => "Failed",
            ServiceStatus::NotFound => "NotFound",
        };
        f.write_str(name)
    }
}

impl Snapshot {
    pub fn service(&self, name: &str) -> Option<&ServiceReading> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Checks the invariants a persisted snapshot must satisfy before it is trusted.
    pub fn check_invariants(&self) -> Result<(), String> {
        check_percent("cpuPercent", self.cpu_percent)?;
        check_percent("memoryPercent", self.memory_percent)?;

        let mut labels = HashSet::new();
        for disk in &self.disks {
            check_percent(&format!("disk {} freePercent", disk.drive_label), disk.free_percent)?;
            if !labels.insert(disk.drive_label.as_str()) {
                return Err(format!("duplicate drive label '{}'", disk.drive_label));
            }
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(format!("duplicate service name '{}'", service.name));
            }
        }

        if let Some(drift) = self.time_drift_seconds {
            if !drift.is_finite() {
                return Err("timeDriftSeconds is not finite".to_string());
            }
        }
        Ok(())
    }
}

fn check_percent(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} out of range: {value}"))
    }
}

/// Rounds to two decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

mod rfc3339_seconds {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        let secs = u64::try_from(*value).map_err(serde::ser::Error::custom)?;
        let st = UNIX_EPOCH + Duration::from_secs(secs);
        serializer.collect_str(&humantime::format_rfc3339_seconds(st))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        let st = humantime::parse_rfc3339(&text).map_err(de::Error::custom)?;
        let secs = st
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(de::Error::custom)?
            .as_secs();
        i64::try_from(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_snapshot() -> Snapshot {
        Snapshot {
            timestamp: 1_760_000_000,
            cpu_percent: 12.5,
            memory_percent: 40.25,
            disks: vec![
                DiskReading {
                    drive_label: "/".to_string(),
                    free_percent: 55.1,
                },
                DiskReading {
                    drive_label: "/var".to_string(),
                    free_percent: 30.0,
                },
            ],
            services: vec![
                ServiceReading {
                    name: "DB".to_string(),
                    status: ServiceStatus::Running,
                },
                ServiceReading {
                    name: "cron".to_string(),
                    status: ServiceStatus::Running,
                },
            ],
            time_drift_seconds: Some(0.4),
            time_zone_id: "UTC".to_string(),
        }
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(95.254), 95.25);
        assert_eq!(round2(95.255_1), 95.26);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn serialized_field_names_are_camel_case() {
        let json = serde_json::to_string(&sample_snapshot()).unwrap();
        for field in [
            "\"timestamp\":\"2025-10-09T08:53:20Z\"",
            "\"cpuPercent\"",
            "\"memoryPercent\"",
            "\"driveLabel\"",
            "\"freePercent\"",
            "\"timeDriftSeconds\"",
            "\"timeZoneId\"",
            "\"status\":\"Running\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn absent_drift_is_omitted() {
        let mut snapshot = sample_snapshot();
        snapshot.time_drift_seconds = None;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("timeDriftSeconds"));

        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.time_drift_seconds, None);
    }

    #[test]
    fn invariants_reject_duplicates_and_ranges() {
        assert!(sample_snapshot().check_invariants().is_ok());

        let mut dup_disk = sample_snapshot();
        dup_disk.disks.push(dup_disk.disks[0].clone());
        assert!(dup_disk.check_invariants().is_err());

        let mut dup_service = sample_snapshot();
        dup_service.services.push(dup_service.services[1].clone());
        assert!(dup_service.check_invariants().is_err());

        let mut cpu = sample_snapshot();
        cpu.cpu_percent = 100.5;
        assert!(cpu.check_invariants().is_err());
    }

    #[test]
    fn status_display_matches_variant_name() {
        assert_eq!(ServiceStatus::StopPending.to_string(), "StopPending");
        assert_eq!(ServiceStatus::NotFound.to_string(), "NotFound");
    }
}
