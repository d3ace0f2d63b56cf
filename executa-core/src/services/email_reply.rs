//! Agent replies that arrive by email.
//!
//! The mail provider posts every inbound message to the reply webhook. A
//! reply is matched to its ticket by the `[id]` in the subject or by the
//! thread reference in `References`/`In-Reply-To`. Only the assigned agent,
//! the shared support mailbox or company addresses may post. Quoted text and
//! signatures are dropped before the reply is stored as an agent message.

use chrono::Utc;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EmailConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::events::{TicketEventKind, TicketEvents};
use crate::models::{ChatMessage, HandoffStatus, HumanAgent, MessageSender, MessageType};
use crate::repo::{Repositories, TicketUpdate};

type HmacSha256 = Hmac<Sha256>;

const UUID_PATTERN: &str =
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

/// Inbound message as posted by the mail provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundEmail {
    pub from: String,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
    pub references: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReplyReceipt {
    pub message: &'static str,
    pub ticket_id: Uuid,
    pub message_id: Uuid,
}

fn subject_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"\[({})\]", UUID_PATTERN)).expect("valid subject pattern")
    })
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"ticket-({})@", UUID_PATTERN)).expect("valid reference pattern")
    })
}

/// Ticket id from the subject first, then from the thread headers.
pub fn ticket_id_from(email: &InboundEmail) -> Option<Uuid> {
    let capture = |pattern: &Regex, value: Option<&str>| {
        value
            .and_then(|v| pattern.captures(v))
            .and_then(|c| Uuid::parse_str(&c[1]).ok())
    };

    capture(subject_pattern(), email.subject.as_deref())
        .or_else(|| capture(reference_pattern(), email.references.as_deref()))
        .or_else(|| capture(reference_pattern(), email.in_reply_to.as_deref()))
}

/// Removes markup, quoted history and signatures from a reply body.
pub fn clean_email_content(content: &str) -> String {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"<[^>]*>",
            r"(?m)^On [^\n]* wrote:[\s\S]*",
            r"(?m)^From:[\s\S]*",
            r"(?m)^>.*$",
            r"(?m)^--[ \t]*$[\s\S]*",
            r"(?i)Best regards[\s\S]*$",
            r"(?im)^Sent from my .*$",
            r"(?i)-----Original Message-----[\s\S]*",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid reply pattern"))
        .collect()
    });
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let blank_runs = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("valid blank pattern"));

    let mut cleaned = content.replace("\r\n", "\n");
    for pattern in patterns {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    blank_runs.replace_all(cleaned.trim(), "\n\n").into_owned()
}

/// `Name <addr@host>` and bare addresses both reduce to the lowercased address.
fn sender_address(from: &str) -> String {
    let from = from.trim();
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    address.trim().to_lowercase()
}

pub struct EmailReplyService {
    repos: Repositories,
    events: TicketEvents,
    webhook_secret: Option<String>,
    reply_address: Option<String>,
    company_domain: Option<String>,
}

impl EmailReplyService {
    pub fn new(repos: Repositories, events: TicketEvents, config: &EmailConfig) -> Self {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            repos,
            events,
            webhook_secret: non_empty(&config.webhook_secret),
            reply_address: non_empty(&config.reply_address).map(|a| a.to_lowercase()),
            company_domain: non_empty(&config.company_domain)
                .map(|d| d.trim_start_matches('@').to_lowercase()),
        }
    }

    /// Checks `sha256=<hex>` over the raw body. With no secret configured
    /// every payload is accepted; with one, the header is mandatory.
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> ExecutaResult<()> {
        let Some(secret) = &self.webhook_secret else {
            return Ok(());
        };
        let digest = signature
            .map(str::trim)
            .and_then(|s| s.strip_prefix("sha256="))
            .and_then(|hex_digest| hex::decode(hex_digest).ok())
            .ok_or(ExecutaError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExecutaError::Internal(format!("Invalid webhook secret: {}", e)))?;
        mac.update(body);
        mac.verify_slice(&digest)
            .map_err(|_| ExecutaError::InvalidSignature)
    }

    fn is_authorized_sender(&self, from: &str, agent: Option<&HumanAgent>) -> bool {
        let address = sender_address(from);
        if address.is_empty() {
            return false;
        }
        agent.is_some_and(|a| a.email.trim().eq_ignore_ascii_case(&address))
            || self.reply_address.as_deref() == Some(address.as_str())
            || self
                .company_domain
                .as_deref()
                .is_some_and(|domain| address.ends_with(&format!("@{}", domain)))
    }

    /// Verifies, parses and stores one inbound reply.
    pub async fn receive(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> ExecutaResult<EmailReplyReceipt> {
        self.verify_signature(body, signature)?;
        let email: InboundEmail = serde_json::from_slice(body)
            .map_err(|e| ExecutaError::validation(format!("Invalid email payload: {}", e)))?;

        let ticket_id = ticket_id_from(&email).ok_or_else(|| {
            debug!(subject = ?email.subject, references = ?email.references, "No ticket id in email");
            ExecutaError::validation("Could not identify ticket")
        })?;
        let mut ticket = self
            .repos
            .handoffs
            .get_handoff(ticket_id)
            .await?
            .ok_or_else(|| ExecutaError::TicketNotFound(ticket_id.to_string()))?;

        let agent = match ticket.assigned_agent_id {
            Some(agent_id) => self.repos.agents.get_agent(agent_id).await?,
            None => None,
        };
        if !self.is_authorized_sender(&email.from, agent.as_ref()) {
            warn!(handoff_id = %ticket.id, from = %email.from, "Rejected email reply from unknown sender");
            return Err(ExecutaError::Forbidden("Unauthorized sender".to_string()));
        }

        let raw = email
            .text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(email.html.as_deref())
            .unwrap_or_default();
        let content = clean_email_content(raw);
        if content.is_empty() {
            return Err(ExecutaError::validation("Email reply has no content"));
        }

        let message = ChatMessage::new(
            ticket.session_id.clone(),
            Some(ticket.assistant_id),
            content,
            MessageType::Text,
            MessageSender::HumanAgent,
        );

        let started = matches!(ticket.status, HandoffStatus::Pending | HandoffStatus::Assigned);
        let message = if started {
            ticket.status = HandoffStatus::InProgress;
            ticket.accepted_at = Some(Utc::now());
            self.repos
                .handoffs
                .apply_ticket_update(&TicketUpdate {
                    request: ticket.clone(),
                    session_status: None,
                    notice: Some(message.clone()),
                })
                .await?;
            message
        } else {
            self.repos.sessions.append_message(&message).await?
        };

        info!(
            handoff_id = %ticket.id,
            message_id = %message.id,
            email_message_id = ?email.message_id,
            status = %ticket.status,
            "Email reply added to ticket"
        );
        if started {
            self.events.emit(
                TicketEventKind::TicketUpdated,
                ticket.account_id,
                ticket.id,
                serde_json::json!({ "status": ticket.status }),
            );
        }
        self.events.emit(
            TicketEventKind::NewMessage,
            ticket.account_id,
            ticket.id,
            serde_json::json!({
                "id": message.id,
                "content": message.content,
                "sender": message.sender,
                "senderName": agent.as_ref().map(|a| a.name.as_str()).unwrap_or("Support"),
                "timestamp": message.created_at,
                "source": "email",
            }),
        );

        Ok(EmailReplyReceipt {
            message: "Email processed successfully",
            ticket_id: ticket.id,
            message_id: message.id,
        })
    }
}
