//! Notification rendering and dispatch.
//!
//! A handoff is rendered into [`OutboundMessage`]s up front and stored in the
//! outbox, so delivery can be retried without re-reading the ticket. The
//! [`Notifier`] performs the actual HTTP or email send.

pub mod email;
pub mod slack;
pub mod teams;
pub mod webhook;

pub use email::{EmailMessage, EmailProvider, EmailSender};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ExecutaConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::{Assistant, ChatMessage, ChatSession, HandoffRequest, NotifyChannel, OutboxEntry};
use crate::settings::{HandoffMethod, HandoffSettings};

/// A fully rendered notification, as stored in an outbox row's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Email(EmailMessage),
    Webhook(WebhookMessage),
}

impl OutboundMessage {
    pub fn from_payload(payload: &serde_json::Value) -> ExecutaResult<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| {
            ExecutaError::SerializationError(format!("Unreadable outbox payload: {}", e))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

/// The ticket and conversation a notification is about.
pub struct HandoffNotice<'a> {
    pub assistant: &'a Assistant,
    pub request: &'a HandoffRequest,
    pub session: &'a ChatSession,
    /// Oldest first. Only rendered when the email settings ask for it.
    pub transcript: &'a [ChatMessage],
}

/// Renders the outbox rows for a handoff according to its notification method.
///
/// The internal method notifies through assignment and events, so it yields
/// no rows.
pub fn plan_notifications(
    settings: &HandoffSettings,
    notice: &HandoffNotice<'_>,
    from_email: &str,
    max_attempts: u32,
) -> ExecutaResult<Vec<OutboxEntry>> {
    let request = notice.request;
    let entry = |channel: NotifyChannel,
                 target: &str,
                 message: &OutboundMessage|
     -> ExecutaResult<OutboxEntry> {
        Ok(OutboxEntry::new(
            request.account_id,
            Some(request.id),
            channel,
            target,
            serde_json::to_value(message)?,
            max_attempts,
        ))
    };

    let mut entries = Vec::new();
    match settings.handoff_method {
        HandoffMethod::Email => {
            let support_email = settings.email_settings.support_email.trim();
            if support_email.is_empty() {
                warn!(handoff_id = %request.id, "No support email configured for handoff");
                return Ok(entries);
            }
            let message = OutboundMessage::Email(email::render_handoff_email(
                notice,
                support_email,
                from_email,
                settings.email_settings.include_conversation_history,
            ));
            entries.push(entry(NotifyChannel::Email, support_email, &message)?);
        }
        HandoffMethod::Integration => {
            let targets = &settings.integration_settings;
            if let Some(url) = targets.slack() {
                let message = OutboundMessage::Webhook(slack::render(notice, url)?);
                entries.push(entry(NotifyChannel::Slack, url, &message)?);
            }
            if let Some(url) = targets.teams() {
                let message = OutboundMessage::Webhook(teams::render(notice, url)?);
                entries.push(entry(NotifyChannel::Teams, url, &message)?);
            }
            if let Some(url) = targets.custom() {
                let message = OutboundMessage::Webhook(webhook::render(
                    notice,
                    url,
                    &targets.webhook_headers,
                )?);
                entries.push(entry(NotifyChannel::Webhook, url, &message)?);
            }
            if entries.is_empty() {
                debug!(handoff_id = %request.id, "No integration targets configured");
            }
        }
        HandoffMethod::InternalNotification => {}
    }

    Ok(entries)
}

/// Sends one rendered message.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> ExecutaResult<()>;
}

pub fn build_http_client(timeout: Duration) -> ExecutaResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExecutaError::Internal(format!("Failed to create HTTP client: {}", e)))
}

pub struct Notifier {
    client: reqwest::Client,
    email: EmailSender,
}

impl Notifier {
    pub fn new(config: &ExecutaConfig) -> ExecutaResult<Self> {
        let client = build_http_client(config.notifications.http_timeout())?;
        let email = EmailSender::new(EmailProvider::from_config(&config.email), client.clone());
        Ok(Self { client, email })
    }

    pub fn with_parts(client: reqwest::Client, email: EmailSender) -> Self {
        Self { client, email }
    }

    pub fn email(&self) -> &EmailSender {
        &self.email
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn post_webhook(&self, message: &WebhookMessage) -> ExecutaResult<()> {
        let mut request = self.client.post(&message.url).json(&message.body);
        for (key, value) in &message.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutaError::notification("webhook", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutaError::notification(
                "webhook",
                format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Deliver for Notifier {
    async fn deliver(&self, message: &OutboundMessage) -> ExecutaResult<()> {
        match message {
            OutboundMessage::Email(email) => self.email.send(email).await,
            OutboundMessage::Webhook(webhook) => self.post_webhook(webhook).await,
        }
    }
}
