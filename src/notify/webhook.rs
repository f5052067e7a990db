use crate::config::WebhookConfig;
use crate::notify::{bounded, DispatchError, SetupError};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Posts alerts as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    host: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    host: &'a str,
    subject: &'a str,
    alerts: &'a [String],
}

impl WebhookNotifier {
    pub fn from_config(cfg: &WebhookConfig, host: &str) -> Result<Self, SetupError> {
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let client = Client::builder()
            .user_agent(concat!("hostwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            host: host.to_string(),
            timeout,
        })
    }

    pub async fn dispatch(&self, subject: &str, body_lines: &[String]) -> Result<(), DispatchError> {
        let body = render_payload(&self.host, subject, body_lines);
        bounded("webhook", self.timeout, async {
            let resp = self
                .client
                .post(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(DispatchError::WebhookStatus(status.as_u16()));
            }
            Ok::<(), DispatchError>(())
        })
        .await
    }
}

fn render_payload(host: &str, subject: &str, alerts: &[String]) -> Vec<u8> {
    // Serializing borrowed strings cannot fail.
    serde_json::to_vec(&Payload {
        host,
        subject,
        alerts,
    })
    .unwrap_or_default()
}
