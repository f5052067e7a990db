pub mod telegram;
pub mod webhook;

use crate::config::Config;
use std::time::Duration;
use telegram::TelegramNotifier;
use thiserror::Error;
use tracing::{info, warn};
use webhook::WebhookNotifier;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
    #[error("webhook answered with status {0}")]
    WebhookStatus(u16),
    #[error("{transport} did not finish within {after:?}")]
    Timeout {
        transport: &'static str,
        after: Duration,
    },
    #[error("{failed} of {attempted} deliveries failed: {first}")]
    Partial {
        failed: usize,
        attempted: usize,
        first: Box<DispatchError>,
    },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("telegram.chat_ids is empty: add at least one chat id")]
    NoChatIds,
    #[error("telegram token not found: set '{0}' in the environment or telegram.bot_token in config")]
    MissingToken(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn dispatch(&self, subject: &str, body_lines: &[String]) -> Result<(), DispatchError>;
}

pub fn subject_for(host: &str) -> String {
    format!("Health check alert: {host}")
}

/// Alert messages separated by a blank line.
pub fn join_body(body_lines: &[String]) -> String {
    body_lines.join("\n\n")
}

pub enum Transport {
    Telegram(TelegramNotifier),
    Webhook(WebhookNotifier),
}

impl Transport {
    fn name(&self) -> &'static str {
        match self {
            Transport::Telegram(_) => "telegram",
            Transport::Webhook(_) => "webhook",
        }
    }

    async fn dispatch(&self, subject: &str, body_lines: &[String]) -> Result<(), DispatchError> {
        match self {
            Transport::Telegram(t) => t.dispatch(subject, body_lines).await,
            Transport::Webhook(w) => w.dispatch(subject, body_lines).await,
        }
    }
}

/// Every configured transport. Each one is attempted even when another fails.
pub struct Transports {
    transports: Vec<Transport>,
}

impl Transports {
    pub fn new(transports: Vec<Transport>) -> Self {
        Self { transports }
    }

    pub fn from_config(cfg: &Config, host: &str) -> Result<Self, SetupError> {
        let mut transports = Vec::new();
        if cfg.telegram.enabled {
            transports.push(Transport::Telegram(TelegramNotifier::from_config(
                &cfg.telegram,
            )?));
        }
        if cfg.webhook.enabled {
            transports.push(Transport::Webhook(WebhookNotifier::from_config(
                &cfg.webhook,
                host,
            )?));
        }
        Ok(Self::new(transports))
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl Notifier for Transports {
    async fn dispatch(&self, subject: &str, body_lines: &[String]) -> Result<(), DispatchError> {
        if self.transports.is_empty() {
            warn!(alerts = body_lines.len(), "no notification transport configured, alerts are only logged");
            return Ok(());
        }

        let mut failures = Vec::new();
        for transport in &self.transports {
            match transport.dispatch(subject, body_lines).await {
                Ok(()) => info!(transport = transport.name(), alerts = body_lines.len(), "alerts delivered"),
                Err(err) => {
                    warn!(transport = transport.name(), error = %err, "alert delivery failed");
                    failures.push(err);
                }
            }
        }

        combine_failures(failures, self.transports.len())
    }
}

/// Folds the failures of `attempted` deliveries into one result. A single
/// delivery keeps its own error; several are reported as `Partial`.
pub(crate) fn combine_failures(
    failures: Vec<DispatchError>,
    attempted: usize,
) -> Result<(), DispatchError> {
    let failed = failures.len();
    let mut failures = failures.into_iter();
    match failures.next() {
        None => Ok(()),
        Some(first) if attempted == 1 => Err(first),
        Some(first) => Err(DispatchError::Partial {
            failed,
            attempted,
            first: Box::new(first),
        }),
    }
}

/// Runs `fut` under `after`, mapping expiry to `DispatchError::Timeout`.
pub(crate) async fn bounded<T, F>(
    transport: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, DispatchError>
where
    F: std::future::Future<Output = Result<T, DispatchError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(DispatchError::Timeout { transport, after }),
    }
}
