use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub host_name: Option<String>,
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub ntp: NtpConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory_percent")]
    pub memory_percent: f64,
    #[serde(default = "default_disk_free_percent")]
    pub disk_free_percent: f64,
    #[serde(default = "default_time_drift_seconds")]
    pub time_drift_seconds: f64,
    pub expected_time_zone: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NtpConfig {
    #[serde(default = "default_ntp_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ntp_server")]
    pub server: String,
    #[serde(default = "default_ntp_port")]
    pub port: u16,
    #[serde(default = "default_ntp_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Overwrite the previous snapshot even when some collectors failed this run.
    #[serde(default = "default_persist_degraded")]
    pub persist_degraded: bool,
    /// Exit non-zero when the snapshot could not be saved.
    #[serde(default)]
    pub fail_on_persist_error: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            enabled: default_ntp_enabled(),
            server: default_ntp_server(),
            port: default_ntp_port(),
            timeout_ms: default_ntp_timeout_ms(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            persist_degraded: default_persist_degraded(),
            fail_on_persist_error: false,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            chat_ids: Vec::new(),
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(host) = &self.host_name {
            if host.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "host_name must not be empty when set".to_string(),
                ));
            }
        }

        validate_thresholds(&self.thresholds)?;
        validate_services(&self.services)?;
        validate_ntp(&self.ntp)?;

        if self.state.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "state.snapshot_path must not be empty".to_string(),
            ));
        }

        validate_telegram(&self.telegram)?;
        validate_webhook(&self.webhook)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_thresholds(cfg: &ThresholdsConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("thresholds.cpu_percent", cfg.cpu_percent),
        ("thresholds.memory_percent", cfg.memory_percent),
        ("thresholds.disk_free_percent", cfg.disk_free_percent),
    ] {
        if !(0.0..=100.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{name} must be in range 0..100"
            )));
        }
    }
    if !cfg.time_drift_seconds.is_finite() || cfg.time_drift_seconds < 0.0 {
        return Err(ConfigError::Validation(
            "thresholds.time_drift_seconds must be >= 0".to_string(),
        ));
    }
    if cfg.expected_time_zone.trim().is_empty() {
        return Err(ConfigError::Validation(
            "thresholds.expected_time_zone must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_services(services: &[String]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for name in services {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "services[*] must not be empty".to_string(),
            ));
        }
        if !names.insert(name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "service '{name}' is listed more than once"
            )));
        }
    }
    Ok(())
}

fn validate_ntp(cfg: &NtpConfig) -> Result<(), ConfigError> {
    if !cfg.enabled {
        return Ok(());
    }
    if cfg.server.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ntp.server must not be empty".to_string(),
        ));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "ntp.port must be in range 1..65535".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "ntp.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_telegram(cfg: &TelegramConfig) -> Result<(), ConfigError> {
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "telegram.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_webhook(cfg: &WebhookConfig) -> Result<(), ConfigError> {
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "webhook.timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.enabled && !(cfg.url.starts_with("http://") || cfg.url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "webhook.url must be an http(s) URL".to_string(),
        ));
    }
    Ok(())
}

const fn default_cpu_percent() -> f64 {
    90.0
}

const fn default_memory_percent() -> f64 {
    90.0
}

const fn default_disk_free_percent() -> f64 {
    10.0
}

const fn default_time_drift_seconds() -> f64 {
    5.0
}

const fn default_ntp_enabled() -> bool {
    true
}

fn default_ntp_server() -> String {
    "pool.ntp.org".to_string()
}

const fn default_ntp_port() -> u16 {
    123
}

const fn default_ntp_timeout_ms() -> u64 {
    3000
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./last_snapshot.json")
}

const fn default_persist_degraded() -> bool {
    true
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

const fn default_notify_timeout_ms() -> u64 {
    10_000
}
