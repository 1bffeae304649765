// src/notify/webhook.rs
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Notifier, RenderedMessage};
use crate::error::NotificationError;

/// Generic JSON webhook: POSTs the whole `RenderedMessage`.
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError> {
        self.client
            .post(&self.url)
            .timeout(self.timeout)
            .json(msg)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
