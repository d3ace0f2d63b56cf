//! Customer-configured webhook payload.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::{HandoffNotice, WebhookMessage};
use crate::error::ExecutaResult;
use crate::models::{HandoffReason, Priority};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HandoffWebhook<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    assistant_id: Uuid,
    assistant_name: &'a str,
    session_id: &'a str,
    handoff_id: Uuid,
    customer: Customer<'a>,
    request: RequestDetails<'a>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct Customer<'a> {
    name: Option<&'a str>,
    email: Option<&'a str>,
    phone: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct RequestDetails<'a> {
    reason: HandoffReason,
    priority: Priority,
    context: Option<&'a str>,
    query: Option<&'a str>,
}

pub fn render(
    notice: &HandoffNotice<'_>,
    url: &str,
    headers: &HashMap<String, String>,
) -> ExecutaResult<WebhookMessage> {
    let session = notice.session;
    let request = notice.request;

    let payload = HandoffWebhook {
        kind: "handoff_request",
        assistant_id: notice.assistant.id,
        assistant_name: &notice.assistant.name,
        session_id: &session.id,
        handoff_id: request.id,
        customer: Customer {
            name: session.customer_name.as_deref(),
            email: session.customer_email.as_deref(),
            phone: session.customer_phone.as_deref(),
        },
        request: RequestDetails {
            reason: request.reason,
            priority: request.priority,
            context: request.context.as_deref(),
            query: request.customer_query.as_deref(),
        },
        timestamp: Utc::now().to_rfc3339(),
    };

    Ok(WebhookMessage {
        url: url.to_string(),
        headers: headers.clone(),
        body: serde_json::to_value(payload)?,
    })
}
