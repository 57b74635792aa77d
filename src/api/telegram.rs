//! Notifiers: Telegram Bot API delivery and a log-only fallback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::trading::Notifier;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends messages to one Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(base_url: &str, token: &str, chat_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Create from TELEGRAM_TOKEN and TELEGRAM_CHAT_ID, with TELEGRAM_API_URL
    /// optionally pointing at a Bot API proxy.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").context("TELEGRAM_TOKEN not set")?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").context("TELEGRAM_CHAT_ID not set")?;
        let base_url = std::env::var("TELEGRAM_API_URL").unwrap_or_else(|_| TELEGRAM_API.to_string());
        Self::new(&base_url, &token, &chat_id)
    }

    async fn post(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let resp = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .context("Failed to reach Telegram")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage failed: {} - {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        if let Err(e) = self.post(text).await {
            warn!(error = %e, "Telegram notification failed");
        }
    }
}

/// Writes notifications to the log instead of a chat.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        info!(message = %text, "Notification");
    }
}

/// Telegram when configured, otherwise the log.
pub fn notifier_from_env() -> Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!("Telegram not configured: {}. Notifications go to the log.", e);
            Arc::new(LogNotifier)
        }
    }
}
