// src/notify/telegram.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notifier, RenderedMessage};
use crate::error::NotificationError;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self, NotificationError> {
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(NotificationError::InvalidConfig(
                "telegram: bot_token and chat_id are required".into(),
            ));
        }
        Ok(Self {
            bot_token,
            chat_id,
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        })
    }

    /// Point at a different Bot API host (self-hosted server, tests).
    pub fn with_api_base(mut self, base: String) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: format!("*{}*\n\n{}", msg.title, msg.body),
            parse_mode: "Markdown",
        };
        let rsp = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(NotificationError::TransportFailure(format!(
                "telegram http {status}: {body}"
            )));
        }
        Ok(())
    }
}
