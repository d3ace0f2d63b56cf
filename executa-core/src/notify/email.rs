//! Email rendering and the provider that sends it.
//!
//! Exactly one provider is active: SendGrid when an API key is configured,
//! otherwise SMTP (with the `smtp` feature) when a host is configured,
//! otherwise messages are only logged.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::HandoffNotice;
use crate::config::EmailConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::{ChatMessage, MessageSender};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Sent as `Message-ID` and `References` so replies can be threaded
    /// back onto the ticket.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Mail thread id for a handoff ticket. Inbound replies quote it in their
/// `References` header.
pub fn thread_reference(ticket_id: uuid::Uuid) -> String {
    format!("ticket-{}@executa.ai", ticket_id)
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn sender_label(sender: MessageSender) -> &'static str {
    match sender {
        MessageSender::Customer => "Customer",
        MessageSender::AiAssistant => "Assistant",
        MessageSender::HumanAgent => "Agent",
        MessageSender::System => "System",
    }
}

fn transcript_html(transcript: &[ChatMessage]) -> String {
    if transcript.is_empty() {
        return "<p><em>No conversation history recorded.</em></p>".to_string();
    }
    let items: String = transcript
        .iter()
        .filter(|m| !m.is_internal)
        .map(|m| {
            format!(
                "<li><strong>{}:</strong> {}</li>",
                sender_label(m.sender),
                escape_html(&m.content)
            )
        })
        .collect();
    format!("<h3>Conversation History</h3><ul>{}</ul>", items)
}

fn transcript_text(transcript: &[ChatMessage]) -> String {
    transcript
        .iter()
        .filter(|m| !m.is_internal)
        .map(|m| format!("{}: {}\n", sender_label(m.sender), m.content))
        .collect()
}

/// The support-team email for a new handoff.
pub fn render_handoff_email(
    notice: &HandoffNotice<'_>,
    to: &str,
    from: &str,
    include_history: bool,
) -> EmailMessage {
    let assistant = &notice.assistant.name;
    let request = notice.request;
    let query = request.customer_query.as_deref().unwrap_or("");
    let time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let context_html = request
        .context
        .as_deref()
        .map(|c| format!("<p><strong>Context:</strong> {}</p>", escape_html(c)))
        .unwrap_or_default();
    let history_html = if include_history {
        transcript_html(notice.transcript)
    } else {
        String::new()
    };

    let html = format!(
        r#"<h2>New Support Request</h2>
<p><strong>Assistant:</strong> {assistant}</p>
<p><strong>Reason:</strong> {reason}</p>
<p><strong>Priority:</strong> {priority}</p>
<p><strong>Customer Query:</strong> {query}</p>
{context_html}
<p><strong>Session ID:</strong> {session}</p>
<p><strong>Request ID:</strong> {id}</p>
<p><strong>Time:</strong> {time}</p>
{history_html}
<p>Please review and respond to this support request.</p>"#,
        assistant = escape_html(assistant),
        reason = request.reason,
        priority = request.priority,
        query = escape_html(query),
        session = escape_html(&notice.session.id),
        id = request.id,
    );

    let mut text = format!(
        "New Support Request\n\nAssistant: {}\nReason: {}\nPriority: {}\nCustomer Query: {}\n",
        assistant, request.reason, request.priority, query
    );
    if let Some(context) = &request.context {
        text.push_str(&format!("Context: {}\n", context));
    }
    text.push_str(&format!(
        "Session ID: {}\nRequest ID: {}\nTime: {}\n",
        notice.session.id, request.id, time
    ));
    if include_history {
        text.push_str("\nConversation History\n");
        text.push_str(&transcript_text(notice.transcript));
    }
    text.push_str("\nPlease review and respond to this support request.\n");

    EmailMessage {
        to: to.to_string(),
        from: from.to_string(),
        subject: format!("New Support Request - {}", assistant),
        html,
        text,
        reference: Some(thread_reference(request.id)),
    }
}

#[derive(Debug, Clone)]
pub enum EmailProvider {
    SendGrid {
        api_key: String,
        base_url: String,
    },
    #[cfg(feature = "smtp")]
    Smtp {
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    },
    Log,
}

impl EmailProvider {
    pub fn from_config(config: &EmailConfig) -> Self {
        if let Some(api_key) = config.sendgrid_api_key.as_deref().filter(|k| !k.is_empty()) {
            return EmailProvider::SendGrid {
                api_key: api_key.to_string(),
                base_url: config.sendgrid_base_url.trim_end_matches('/').to_string(),
            };
        }

        #[cfg(feature = "smtp")]
        if let Some(host) = config.smtp_host.as_deref().filter(|h| !h.is_empty()) {
            return EmailProvider::Smtp {
                host: host.to_string(),
                port: config.smtp_port,
                username: config.smtp_username.clone(),
                password: config.smtp_password.clone(),
            };
        }

        EmailProvider::Log
    }

    pub fn name(&self) -> &'static str {
        match self {
            EmailProvider::SendGrid { .. } => "sendgrid",
            #[cfg(feature = "smtp")]
            EmailProvider::Smtp { .. } => "smtp",
            EmailProvider::Log => "log",
        }
    }
}

pub struct EmailSender {
    provider: EmailProvider,
    client: reqwest::Client,
}

impl EmailSender {
    pub fn new(provider: EmailProvider, client: reqwest::Client) -> Self {
        Self { provider, client }
    }

    pub fn provider(&self) -> &EmailProvider {
        &self.provider
    }

    pub async fn send(&self, message: &EmailMessage) -> ExecutaResult<()> {
        debug!(to = %message.to, provider = self.provider.name(), "Sending email");
        match &self.provider {
            EmailProvider::SendGrid { api_key, base_url } => {
                self.send_sendgrid(api_key, base_url, message).await
            }
            #[cfg(feature = "smtp")]
            EmailProvider::Smtp {
                host,
                port,
                username,
                password,
            } => send_smtp(host, *port, username.as_deref(), password.as_deref(), message).await,
            EmailProvider::Log => {
                info!(
                    to = %message.to,
                    from = %message.from,
                    subject = %message.subject,
                    "No email provider configured, logging email instead of sending"
                );
                Ok(())
            }
        }
    }

    async fn send_sendgrid(
        &self,
        api_key: &str,
        base_url: &str,
        message: &EmailMessage,
    ) -> ExecutaResult<()> {
        let mut body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": message.from },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.text },
                { "type": "text/html", "value": message.html },
            ],
        });
        if let Some(reference) = &message.reference {
            let id = format!("<{}>", reference);
            body["headers"] = json!({ "Message-ID": id, "References": id });
        }

        let response = self
            .client
            .post(format!("{}/v3/mail/send", base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutaError::notification("email", e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ExecutaError::RateLimited {
                service: "SendGrid".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutaError::notification(
                "email",
                format!(
                    "SendGrid returned {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "smtp")]
async fn send_smtp(
    host: &str,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
    message: &EmailMessage,
) -> ExecutaResult<()> {
    use lettre::message::MultiPart;
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

    let smtp_error = |e: &dyn std::fmt::Display| ExecutaError::notification("email", e.to_string());

    let mut builder = Message::builder()
        .from(
            message
                .from
                .parse()
                .map_err(|e| ExecutaError::InvalidRecipient(format!("{}: {}", message.from, e)))?,
        )
        .to(message
            .to
            .parse()
            .map_err(|e| ExecutaError::InvalidRecipient(format!("{}: {}", message.to, e)))?)
        .subject(message.subject.clone());
    if let Some(reference) = &message.reference {
        let id = format!("<{}>", reference);
        builder = builder.message_id(Some(id.clone())).references(id);
    }
    let email = builder
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| smtp_error(&e))?;

    let mut transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        .map_err(|e| smtp_error(&e))?
        .port(port);
    if let (Some(user), Some(pass)) = (username, password) {
        transport = transport.credentials(Credentials::new(user.to_string(), pass.to_string()));
    }

    transport
        .build()
        .send(email)
        .await
        .map_err(|e| smtp_error(&e))?;

    Ok(())
}
