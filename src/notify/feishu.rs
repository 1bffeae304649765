// src/notify/feishu.rs
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Notifier, RenderedMessage};
use crate::error::NotificationError;

/// Feishu custom-bot webhook, sent as an interactive card.
pub struct FeishuNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
}

impl FeishuNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

fn card(title: &str, body: &str) -> Value {
    json!({
        "msg_type": "interactive",
        "card": {
            "config": { "wide_screen_mode": true },
            "header": {
                "template": "blue",
                "title": { "content": title, "tag": "plain_text" }
            },
            "elements": [
                { "tag": "div", "text": { "content": body, "tag": "lark_md" } }
            ]
        }
    })
}

/// Feishu answers HTTP 200 with a non-zero `code`/`StatusCode` on rejection.
fn api_error(rsp: &Value) -> Option<String> {
    let code = rsp
        .get("code")
        .or_else(|| rsp.get("StatusCode"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if code == 0 {
        return None;
    }
    let msg = rsp
        .get("msg")
        .or_else(|| rsp.get("StatusMessage"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(format!("feishu code {code}: {msg}"))
}

#[async_trait]
impl Notifier for FeishuNotifier {
    fn channel(&self) -> &'static str {
        "feishu"
    }

    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError> {
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&card(&msg.title, &msg.body))
            .send()
            .await?
            .error_for_status()?;
        // Some deployments reply with an empty body.
        let body: Value = rsp.json().await.unwrap_or(Value::Null);
        match api_error(&body) {
            Some(e) => Err(NotificationError::TransportFailure(e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_carries_title_and_body() {
        let c = card("Loader changed", "9.8.0 -> 9.9.0");
        assert_eq!(c["msg_type"], "interactive");
        assert_eq!(c["card"]["header"]["title"]["content"], "Loader changed");
        assert_eq!(c["card"]["elements"][0]["text"]["content"], "9.8.0 -> 9.9.0");
    }

    #[test]
    fn nonzero_code_is_an_error() {
        assert_eq!(api_error(&json!({"code": 0, "msg": "success"})), None);
        assert_eq!(api_error(&json!({"StatusCode": 0})), None);
        assert_eq!(api_error(&Value::Null), None);
        assert_eq!(
            api_error(&json!({"code": 19021, "msg": "sign match fail"})).as_deref(),
            Some("feishu code 19021: sign match fail")
        );
    }
}
