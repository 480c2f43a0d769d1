//! Telegram Bot API adapter for alert and upload notifications.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Notifier;
use crate::core::shutdown::Shutdown;

/// Telegram Bot API client
pub struct TelegramClient {
    /// Bot token
    bot_token: String,
    /// Target chat ID
    chat_id: String,
    /// Extra attempts after the first failure
    retry_attempts: u32,
    /// Wait between attempts
    retry_delay: Duration,
    /// Interrupts retry waits
    shutdown: Option<Shutdown>,
    /// HTTP client
    client: reqwest::Client,
}

/// Response from Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Message result from sendMessage
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

/// Configuration for Telegram client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

impl TelegramClient {
    /// Create a new Telegram client
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            retry_attempts: default_retry_attempts(),
            retry_delay: Duration::from_secs(default_retry_delay_seconds()),
            shutdown: None,
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: TelegramConfig) -> Self {
        let mut client = Self::new(config.bot_token, config.chat_id);
        client.retry_attempts = config.retry_attempts;
        client.retry_delay = Duration::from_secs(config.retry_delay_seconds);
        client
    }

    /// Abort pending retries when `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.bot_token, method
        )
    }

    /// Send a text message once
    pub async fn send_message(&self, text: &str) -> Result<i64> {
        let url = self.api_url("sendMessage");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let result: TelegramResponse<MessageResult> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        if !result.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                result.description.unwrap_or_default()
            );
        }

        Ok(result.result.map(|r| r.message_id).unwrap_or(0))
    }

    /// Send with retries on failure
    pub async fn send_with_retry(&self, text: &str) -> Result<i64> {
        let mut attempt = 0;
        loop {
            match self.send_message(text).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        "Telegram send failed ({}). Retry {}/{} in {:?}",
                        e,
                        attempt,
                        self.retry_attempts,
                        self.retry_delay
                    );
                    let stopped = match &self.shutdown {
                        Some(shutdown) => shutdown.wait(self.retry_delay).await,
                        None => {
                            tokio::time::sleep(self.retry_delay).await;
                            false
                        }
                    };
                    if stopped {
                        return Err(e.context("Shutdown during Telegram retry"));
                    }
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Telegram failed after {} retries",
                        self.retry_attempts
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, text: &str) -> Result<()> {
        self.send_with_retry(text).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let client = TelegramClient::new("TOKEN".to_string(), "123".to_string());
        assert_eq!(
            client.api_url("sendMessage"),
            "https://api.telegram.org/botTOKEN/sendMessage"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config: TelegramConfig =
            serde_json::from_str(r#"{"bot_token": "t", "chat_id": "c"}"#).unwrap();
        let client = TelegramClient::from_config(config);
        assert_eq!(client.retry_attempts, 3);
        assert_eq!(client.retry_delay, Duration::from_secs(5));
    }
}
