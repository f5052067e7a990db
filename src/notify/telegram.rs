use crate::config::TelegramConfig;
use crate::notify::{bounded, combine_failures, join_body, DispatchError, SetupError};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use tracing::{debug, warn};

pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<i64>,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn from_config(cfg: &TelegramConfig) -> Result<Self, SetupError> {
        let token = resolve_token(cfg)?;
        Ok(Self {
            bot: Bot::new(token),
            chat_ids: cfg.chat_ids.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        })
    }

    /// Sends one HTML message per configured chat. Every chat is attempted
    /// even when an earlier one fails.
    pub async fn dispatch(&self, subject: &str, body_lines: &[String]) -> Result<(), DispatchError> {
        let text = render_message(subject, body_lines);
        let mut failures = Vec::new();
        for chat_id in &self.chat_ids {
            let sent = bounded("telegram", self.timeout, async {
                self.bot
                    .send_message(ChatId(*chat_id), text.clone())
                    .parse_mode(ParseMode::Html)
                    .await?;
                Ok::<(), DispatchError>(())
            })
            .await;
            match sent {
                Ok(()) => debug!(chat_id = *chat_id, "telegram alert sent"),
                Err(err) => {
                    warn!(chat_id = *chat_id, error = %err, "telegram alert not delivered");
                    failures.push(err);
                }
            }
        }
        combine_failures(failures, self.chat_ids.len())
    }
}

fn resolve_token(cfg: &TelegramConfig) -> Result<String, SetupError> {
    if cfg.chat_ids.is_empty() {
        return Err(SetupError::NoChatIds);
    }

    if let Ok(v) = std::env::var(&cfg.bot_token_env) {
        if !v.trim().is_empty() {
            return Ok(v.trim().to_string());
        }
    }

    cfg.bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SetupError::MissingToken(cfg.bot_token_env.clone()))
}

fn render_message(subject: &str, body_lines: &[String]) -> String {
    let body: Vec<String> = body_lines.iter().map(|l| escape_html(l)).collect();
    format!("<b>{}</b>\n\n{}", escape_html(subject), join_body(&body))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
