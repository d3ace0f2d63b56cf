//! Slack incoming-webhook payload.

use serde::Serialize;
use std::collections::HashMap;

use super::{HandoffNotice, WebhookMessage};
use crate::error::ExecutaResult;
use crate::models::Priority;

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: &'static str,
    fields: Vec<SlackField>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: &'static str,
    value: String,
    short: bool,
}

impl SlackField {
    fn short(title: &'static str, value: impl Into<String>) -> Self {
        Self {
            title,
            value: value.into(),
            short: true,
        }
    }
}

fn priority_color(priority: Priority) -> &'static str {
    if priority == Priority::High {
        "danger"
    } else {
        "warning"
    }
}

pub fn render(notice: &HandoffNotice<'_>, url: &str) -> ExecutaResult<WebhookMessage> {
    let session = notice.session;
    let request = notice.request;

    let message = SlackMessage {
        text: format!(
            "🚨 New support request from {}",
            session.customer_name.as_deref().unwrap_or("Customer")
        ),
        attachments: vec![SlackAttachment {
            color: priority_color(request.priority),
            fields: vec![
                SlackField::short("Assistant", notice.assistant.name.clone()),
                SlackField::short("Reason", request.reason.as_str()),
                SlackField::short("Priority", request.priority.as_str()),
                SlackField::short(
                    "Customer",
                    session.customer_email.as_deref().unwrap_or("Unknown"),
                ),
            ],
        }],
    };

    Ok(WebhookMessage {
        url: url.to_string(),
        headers: HashMap::new(),
        body: serde_json::to_value(message)?,
    })
}
