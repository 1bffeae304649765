// src/notify/mod.rs
//! Change notifications: one `Notifier` per configured channel, fanned out by
//! `NotifierMux`. A failing channel never stops the others.

pub mod discord;
pub mod email;
pub mod feishu;
pub mod render;
pub mod slack;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::NotificationError;
use crate::normalize::summarize;

pub use render::{DefaultRenderer, FormatterRef, MessageRenderer, TemplateContext};

/// Summaries carried in events are cut to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub task_name: String,
    pub old_value_summary: String,
    pub new_value_summary: String,
    pub url: String,
    pub screenshot_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        task_name: impl Into<String>,
        url: impl Into<String>,
        old_value: &str,
        new_value: &str,
        screenshot_ref: Option<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            old_value_summary: summarize(old_value, SUMMARY_MAX_CHARS),
            new_value_summary: summarize(new_value, SUMMARY_MAX_CHARS),
            url: url.into(),
            screenshot_ref,
            timestamp: Utc::now(),
        }
    }
}

/// What every channel sends: a title, a rendered body and the event behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    pub event: NotificationEvent,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError>;
}

/// Channel definitions as written in config. Secrets set to `"ENV"` are read
/// from the environment at load time (see [`ChannelConfig::resolve_env`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Telegram {
        bot_token: String,
        chat_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_base: Option<String>,
    },
    Feishu {
        webhook: String,
    },
    Discord {
        webhook: String,
    },
    Slack {
        webhook: String,
    },
    Webhook {
        url: String,
    },
    Email {
        smtp_host: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        smtp_port: Option<u16>,
        username: String,
        password: String,
        from: String,
        to: String,
    },
}

const ENV_MARKER: &str = "ENV";

fn from_env_if_marked(value: &mut String, var: &str) -> Result<(), NotificationError> {
    if value.trim().eq_ignore_ascii_case(ENV_MARKER) {
        *value = std::env::var(var)
            .map_err(|_| NotificationError::InvalidConfig(format!("{var} is not set")))?;
    }
    Ok(())
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Feishu { .. } => "feishu",
            ChannelConfig::Discord { .. } => "discord",
            ChannelConfig::Slack { .. } => "slack",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Email { .. } => "email",
        }
    }

    /// Replace `"ENV"` placeholders with the channel's environment variable.
    pub fn resolve_env(&mut self) -> Result<(), NotificationError> {
        match self {
            ChannelConfig::Telegram { bot_token, .. } => {
                from_env_if_marked(bot_token, "TELEGRAM_BOT_TOKEN")
            }
            ChannelConfig::Feishu { webhook } => from_env_if_marked(webhook, "FEISHU_WEBHOOK_URL"),
            ChannelConfig::Discord { webhook } => {
                from_env_if_marked(webhook, "DISCORD_WEBHOOK_URL")
            }
            ChannelConfig::Slack { webhook } => from_env_if_marked(webhook, "SLACK_WEBHOOK_URL"),
            ChannelConfig::Webhook { url } => from_env_if_marked(url, "NOTIFY_WEBHOOK_URL"),
            ChannelConfig::Email { password, .. } => from_env_if_marked(password, "SMTP_PASS"),
        }
    }

    /// Build the channel's notifier. `timeout_secs` bounds every HTTP request
    /// the notifier makes.
    pub fn build(&self, timeout_secs: u64) -> Result<Arc<dyn Notifier>, NotificationError> {
        let notifier: Arc<dyn Notifier> = match self {
            ChannelConfig::Telegram {
                bot_token,
                chat_id,
                api_base,
            } => {
                let mut n = telegram::TelegramNotifier::new(bot_token.clone(), chat_id.clone())?
                    .with_timeout(timeout_secs);
                if let Some(base) = api_base {
                    n = n.with_api_base(base.clone());
                }
                Arc::new(n)
            }
            ChannelConfig::Feishu { webhook } => Arc::new(
                feishu::FeishuNotifier::new(require_url("feishu", webhook)?).with_timeout(timeout_secs),
            ),
            ChannelConfig::Discord { webhook } => Arc::new(
                discord::DiscordNotifier::new(require_url("discord", webhook)?).with_timeout(timeout_secs),
            ),
            ChannelConfig::Slack { webhook } => Arc::new(
                slack::SlackNotifier::new(require_url("slack", webhook)?).with_timeout(timeout_secs),
            ),
            ChannelConfig::Webhook { url } => Arc::new(
                webhook::WebhookNotifier::new(require_url("webhook", url)?).with_timeout(timeout_secs),
            ),
            ChannelConfig::Email {
                smtp_host,
                smtp_port,
                username,
                password,
                from,
                to,
            } => Arc::new(email::EmailNotifier::new(email::SmtpSettings {
                host: smtp_host.clone(),
                port: *smtp_port,
                username: username.clone(),
                password: password.clone(),
                from: from.clone(),
                to: to.clone(),
            })?),
        };
        Ok(notifier)
    }
}

fn require_url(channel: &str, url: &str) -> Result<String, NotificationError> {
    let t = url.trim();
    if t.starts_with("http://") || t.starts_with("https://") {
        Ok(t.to_string())
    } else {
        Err(NotificationError::InvalidConfig(format!(
            "{channel}: `{t}` is not an http(s) url"
        )))
    }
}

/// Per-request timeout for HTTP notification channels.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

fn default_timeout_secs() -> u64 {
    DEFAULT_NOTIFY_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

impl NotificationConfig {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Outcome of one channel for one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub channel: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelReport {
    fn ok(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ok: true,
            error: None,
        }
    }

    fn failed(channel: &str, err: &NotificationError) -> Self {
        Self {
            channel: channel.to_string(),
            ok: false,
            error: Some(err.to_string()),
        }
    }
}

/// Fan-out over channels. Channels that failed to build are kept so every
/// dispatch reports them.
#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Arc<dyn Notifier>>,
    broken: Vec<(&'static str, NotificationError)>,
}

impl NotifierMux {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            notifiers,
            broken: Vec::new(),
        }
    }

    pub fn from_config(cfg: &NotificationConfig) -> Self {
        let mut mux = Self::default();
        for ch in &cfg.channels {
            match ch.build(cfg.timeout_secs) {
                Ok(n) => mux.notifiers.push(n),
                Err(e) => {
                    tracing::warn!(channel = ch.kind(), error = %e, "notification channel unusable");
                    mux.broken.push((ch.kind(), e));
                }
            }
        }
        mux
    }

    pub fn len(&self) -> usize {
        self.notifiers.len() + self.broken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `msg` once through every channel, sequentially, and report each outcome.
    pub async fn dispatch(&self, msg: &RenderedMessage) -> Vec<ChannelReport> {
        let mut reports = Vec::with_capacity(self.len());

        for (channel, err) in &self.broken {
            counter!("pagewatch_notifications_total", "channel" => *channel, "status" => "error")
                .increment(1);
            reports.push(ChannelReport::failed(channel, err));
        }

        for n in &self.notifiers {
            let channel = n.channel();
            match n.send(msg).await {
                Ok(()) => {
                    counter!("pagewatch_notifications_total", "channel" => channel, "status" => "ok")
                        .increment(1);
                    tracing::info!(task = %msg.event.task_name, channel, "notification sent");
                    reports.push(ChannelReport::ok(channel));
                }
                Err(e) => {
                    counter!("pagewatch_notifications_total", "channel" => channel, "status" => "error")
                        .increment(1);
                    tracing::warn!(task = %msg.event.task_name, channel, error = %e, "notification failed");
                    reports.push(ChannelReport::failed(channel, &e));
                }
            }
        }
        reports
    }
}
