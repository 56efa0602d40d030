//! Outbound delivery channel.
//!
//! A sender performs one attempt and reports the result; retries are the
//! dispatcher's decision, not the channel's.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use agentdesk_common::error::AppError;
use agentdesk_common::types::NotificationRecord;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification for `record` to `target`.
    async fn send(&self, target: &str, record: &NotificationRecord) -> Result<(), AppError>;
}

/// Telegram Bot API `sendMessage` sender. `target` is the chat id.
#[derive(Debug, Clone)]
pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramSender {
    pub fn new(bot_token: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
        })
    }

    /// Point the sender at a different API host (proxies, test servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, target: &str, record: &NotificationRecord) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&json!({
                "chat_id": target,
                "text": summary_line(record),
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Delivery(format!(
                "telegram returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        Ok(())
    }
}

/// Plain one-line description of the record.
pub fn summary_line(record: &NotificationRecord) -> String {
    let title = if record.task_title.is_empty() {
        record.task_id.as_str()
    } else {
        record.task_title.as_str()
    };

    format!("[{}] {} {}", record.project_name, title, record.status)
}
