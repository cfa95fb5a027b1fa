//! Outbound alert channels: Slack webhook and SMTP email

use crate::config::{NotificationsConfig, SmtpConfig};
use crate::error::NotificationError;
use crate::types::scoring::SeverityLevel;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::{debug, info};

/// Whether a notification was actually sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Channel not configured
    Skipped,
}

pub trait SlackNotifier: Send + Sync {
    fn notify(
        &self,
        level: SeverityLevel,
        message: &str,
    ) -> Result<NotifyOutcome, NotificationError>;
}

pub trait EmailNotifier: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<NotifyOutcome, NotificationError>;
}

/// Slack message body, e.g. `{"text": "SEVERE ALERT: Severity: 0.95 (Severe)"}`
pub fn slack_payload(level: SeverityLevel, message: &str) -> serde_json::Value {
    serde_json::json!({
        "text": format!("{} ALERT: {}", level.as_str().to_uppercase(), message)
    })
}

/// Incoming-webhook client. An empty URL disables the channel.
pub struct SlackWebhook {
    url: Option<String>,
    agent: ureq::Agent,
}

impl SlackWebhook {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let url = Some(url.trim())
            .filter(|url| !url.is_empty())
            .map(String::from);
        Self {
            url,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn from_config(config: &NotificationsConfig) -> Self {
        Self::new(
            &config.slack_webhook_url,
            Duration::from_secs(config.slack_timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

impl SlackNotifier for SlackWebhook {
    fn notify(
        &self,
        level: SeverityLevel,
        message: &str,
    ) -> Result<NotifyOutcome, NotificationError> {
        let Some(url) = &self.url else {
            debug!("No Slack webhook configured, skipping alert");
            return Ok(NotifyOutcome::Skipped);
        };

        let payload = slack_payload(level, message);
        let response = self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&payload.to_string())
            .map_err(|e| NotificationError::Webhook(e.to_string()))?;

        info!(level = %level, status = response.status(), "Slack alert sent");
        Ok(NotifyOutcome::Delivered)
    }
}

/// Plain-text mailer over SMTP with STARTTLS.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Host, sender and at least one recipient are required.
    pub fn is_configured(&self) -> bool {
        !self.config.host.trim().is_empty()
            && !self.config.from.trim().is_empty()
            && self.recipients().next().is_some()
    }

    fn recipients(&self) -> impl Iterator<Item = &str> + '_ {
        self.config
            .to
            .iter()
            .map(|addr| addr.trim())
            .filter(|addr| !addr.is_empty())
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message, NotificationError> {
        let from: Mailbox = parse_mailbox(&self.config.from)?;
        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in self.recipients() {
            builder = builder.to(parse_mailbox(recipient)?);
        }
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotificationError::Email(e.to_string()))
    }

    fn transport(&self) -> Result<SmtpTransport, NotificationError> {
        let mut builder = SmtpTransport::starttls_relay(self.config.host.trim())
            .map_err(|e| NotificationError::Email(e.to_string()))?
            .port(self.config.port)
            .timeout(Some(Duration::from_secs(self.config.timeout_secs)));

        if !self.config.user.is_empty() && !self.config.pass.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.user.clone(),
                self.config.pass.clone(),
            ));
        }
        Ok(builder.build())
    }
}

impl EmailNotifier for SmtpMailer {
    fn send(&self, subject: &str, body: &str) -> Result<NotifyOutcome, NotificationError> {
        if !self.is_configured() {
            debug!("SMTP or recipients not configured, skipping email alert");
            return Ok(NotifyOutcome::Skipped);
        }

        let message = self.build_message(subject, body)?;
        self.transport()?
            .send(&message)
            .map_err(|e| NotificationError::Email(e.to_string()))?;

        info!(subject = %subject, recipients = self.recipients().count(), "Email alert sent");
        Ok(NotifyOutcome::Delivered)
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotificationError> {
    addr.trim()
        .parse()
        .map_err(|_| NotificationError::Address(addr.to_string()))
}
