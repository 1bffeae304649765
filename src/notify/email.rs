// src/notify/email.rs
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Notifier, RenderedMessage};
use crate::error::NotificationError;

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn invalid(what: &str, e: impl std::fmt::Display) -> NotificationError {
    NotificationError::InvalidConfig(format!("email {what}: {e}"))
}

impl EmailNotifier {
    pub fn new(s: SmtpSettings) -> Result<Self, NotificationError> {
        let creds = Credentials::new(s.username, s.password);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&s.host)
            .map_err(|e| invalid("smtp_host", e))?
            .credentials(creds);
        if let Some(port) = s.port {
            builder = builder.port(port);
        }
        let mailer = builder.build();

        let from = s.from.parse().map_err(|e| invalid("from", e))?;
        let to = s.to.parse().map_err(|e| invalid("to", e))?;

        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, msg: &RenderedMessage) -> Result<(), NotificationError> {
        let mail = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(msg.title.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(msg.body.clone())
            .map_err(|e| NotificationError::TransportFailure(format!("build email: {e}")))?;

        self.mailer
            .send(mail)
            .await
            .map_err(|e| NotificationError::TransportFailure(format!("send email: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: Some(2525),
            username: "u".into(),
            password: "p".into(),
            from: "Monitor <monitor@example.com>".into(),
            to: "ops@example.com".into(),
        }
    }

    #[test]
    fn builds_from_valid_settings() {
        assert!(EmailNotifier::new(settings()).is_ok());
    }

    #[test]
    fn bad_address_is_invalid_config() {
        let mut s = settings();
        s.to = "not an address".into();
        assert!(matches!(
            EmailNotifier::new(s),
            Err(NotificationError::InvalidConfig(_))
        ));
    }
}
