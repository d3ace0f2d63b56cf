//! Microsoft Teams connector MessageCard.

use serde_json::json;
use std::collections::HashMap;

use super::{HandoffNotice, WebhookMessage};
use crate::error::ExecutaResult;
use crate::models::Priority;

pub fn render(notice: &HandoffNotice<'_>, url: &str) -> ExecutaResult<WebhookMessage> {
    let request = notice.request;
    let assistant = &notice.assistant.name;
    let theme_color = if request.priority == Priority::High {
        "FF0000"
    } else {
        "FFA500"
    };

    let body = json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": theme_color,
        "summary": "New Support Request",
        "sections": [{
            "activityTitle": "New Support Request",
            "activitySubtitle": format!("From {}", assistant),
            "facts": [
                { "name": "Customer", "value": notice.session.customer_email.as_deref().unwrap_or("Unknown") },
                { "name": "Reason", "value": request.reason.as_str() },
                { "name": "Priority", "value": request.priority.as_str() },
                { "name": "Assistant", "value": assistant },
            ],
        }],
    });

    Ok(WebhookMessage {
        url: url.to_string(),
        headers: HashMap::new(),
        body,
    })
}
