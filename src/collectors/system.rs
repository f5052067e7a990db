use crate::collectors::{ntp, CollectError, Probes};
use crate::config::NtpConfig;
use crate::snapshot::{DiskReading, ServiceStatus};
#[cfg(unix)]
use std::fs;
use std::process::Output;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

/// Gap between the two CPU samples; usage is the delta between them.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound for `systemctl`, `sc`, `timedatectl` and `tzutil`.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SystemProbes {
    system: System,
}

impl SystemProbes {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl Probes for SystemProbes {
    fn host_name(&self) -> Option<String> {
        self.system.host_name()
    }

    async fn cpu_percent(&mut self) -> Result<f64, CollectError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(CollectError::Unavailable("cpu counters"));
        }
        time::sleep(CPU_SAMPLE_INTERVAL).await;
        self.system.refresh_cpu();

        let usage = self.system.global_cpu_info().cpu_usage() as f64;
        if !usage.is_finite() {
            return Err(CollectError::Other(format!("cpu usage reading {usage}")));
        }
        Ok(usage)
    }

    fn memory_percent(&mut self) -> Result<f64, CollectError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectError::Unavailable("memory counters"));
        }
        let used = self.system.used_memory();
        Ok(percent(used, total))
    }

    fn disks(&mut self) -> Result<Vec<DiskReading>, CollectError> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let disks: Vec<DiskReading> = self
            .system
            .disks()
            .iter()
            .filter(|d| !d.is_removable() && d.total_space() > 0)
            .map(|d| DiskReading {
                drive_label: d.mount_point().to_string_lossy().to_string(),
                free_percent: percent(d.available_space(), d.total_space()),
            })
            .collect();

        if disks.is_empty() {
            return Err(CollectError::Unavailable("fixed volumes"));
        }
        Ok(disks)
    }

    async fn service_status(&self, name: &str) -> ServiceStatus {
        query_service(name).await
    }

    async fn time_zone_id(&self) -> String {
        match current_time_zone().await {
            Some(zone) => zone,
            None => {
                warn!("could not determine the host time zone");
                "unknown".to_string()
            }
        }
    }

    async fn time_drift(&self, cfg: &NtpConfig) -> Result<f64, CollectError> {
        let drift =
            ntp::measure_drift(&cfg.server, cfg.port, Duration::from_millis(cfg.timeout_ms))
                .await?;
        Ok(drift)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

/// Runs `program` and returns its output, or `None` when it cannot be started
/// or does not exit within `limit`. A timed-out child is killed.
#[cfg_attr(not(any(unix, target_os = "windows")), allow(dead_code))]
async fn run_command(program: &str, args: &[&str], limit: Duration) -> Option<Output> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    match time::timeout(limit, command.output()).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(err)) => {
            debug!(program, error = %err, "command not available");
            None
        }
        Err(_elapsed) => {
            warn!(program, timeout = ?limit, "command did not finish in time");
            None
        }
    }
}

#[cfg(target_os = "linux")]
async fn query_service(name: &str) -> ServiceStatus {
    let args = ["show", name, "--property=LoadState", "--property=ActiveState"];
    let Some(output) = run_command("systemctl", &args, COMMAND_TIMEOUT).await else {
        return ServiceStatus::NotFound;
    };
    if !output.status.success() {
        return ServiceStatus::NotFound;
    }
    parse_systemctl_show(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(target_os = "windows")]
async fn query_service(name: &str) -> ServiceStatus {
    let Some(output) = run_command("sc", &["query", name], COMMAND_TIMEOUT).await else {
        return ServiceStatus::NotFound;
    };
    parse_sc_query(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
async fn query_service(name: &str) -> ServiceStatus {
    debug!(service = name, "service lookup unsupported on this platform");
    ServiceStatus::NotFound
}

/// Maps `systemctl show -p LoadState -p ActiveState` output to a status.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_systemctl_show(text: &str) -> ServiceStatus {
    let mut load_state = "";
    let mut active_state = "";
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "LoadState" => load_state = value.trim(),
                "ActiveState" => active_state = value.trim(),
                _ => {}
            }
        }
    }

    if load_state.is_empty() || load_state == "not-found" {
        return ServiceStatus::NotFound;
    }
    match active_state {
        "active" | "reloading" => ServiceStatus::Running,
        "inactive" => ServiceStatus::Stopped,
        "activating" => ServiceStatus::StartPending,
        "deactivating" => ServiceStatus::StopPending,
        "failed" => ServiceStatus::Failed,
        _ => ServiceStatus::NotFound,
    }
}

/// Maps `sc query <name>` output to a status. Error 1060 means unknown service.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_sc_query(text: &str) -> ServiceStatus {
    for line in text.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "STATE" {
            continue;
        }
        let state = value.split_whitespace().nth(1).unwrap_or_default();
        return match state {
            "RUNNING" => ServiceStatus::Running,
            "STOPPED" => ServiceStatus::Stopped,
            "START_PENDING" => ServiceStatus::StartPending,
            "STOP_PENDING" => ServiceStatus::StopPending,
            "CONTINUE_PENDING" => ServiceStatus::ContinuePending,
            "PAUSE_PENDING" => ServiceStatus::PausePending,
            "PAUSED" => ServiceStatus::Paused,
            _ => ServiceStatus::NotFound,
        };
    }
    ServiceStatus::NotFound
}

#[cfg(target_os = "windows")]
async fn current_time_zone() -> Option<String> {
    let output = run_command("tzutil", &["/g"], COMMAND_TIMEOUT).await?;
    if !output.status.success() {
        return None;
    }
    let zone = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!zone.is_empty()).then_some(zone)
}

#[cfg(unix)]
async fn current_time_zone() -> Option<String> {
    let args = ["show", "--property=Timezone", "--value"];
    if let Some(output) = run_command("timedatectl", &args, COMMAND_TIMEOUT).await {
        if output.status.success() {
            let zone = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !zone.is_empty() {
                return Some(zone);
            }
        }
    }

    if let Ok(text) = fs::read_to_string("/etc/timezone") {
        let zone = text.trim();
        if !zone.is_empty() {
            return Some(zone.to_string());
        }
    }

    let target = fs::read_link("/etc/localtime").ok()?;
    zone_from_localtime_link(&target.to_string_lossy())
}

#[cfg(not(any(unix, target_os = "windows")))]
async fn current_time_zone() -> Option<String> {
    None
}

/// `/usr/share/zoneinfo/Europe/Berlin` -> `Europe/Berlin`.
#[cfg_attr(not(unix), allow(dead_code))]
fn zone_from_localtime_link(target: &str) -> Option<String> {
    let (_, zone) = target.split_once("zoneinfo/")?;
    let zone = zone.trim_matches('/');
    (!zone.is_empty()).then(|| zone.to_string())
}
