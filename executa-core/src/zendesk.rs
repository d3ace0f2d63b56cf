//! Zendesk ticket sync.
//!
//! Creates a Zendesk ticket from a handoff, pulls status and priority back
//! from Zendesk, and pushes local changes out. Calls are made once: there is
//! no retry, idempotency key, or conflict detection.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ZendeskConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::{ChatSession, HandoffRequest, HandoffStatus, Priority};
use crate::repo::{Repositories, TicketUpdate};
use crate::services::account_ticket;

const FALLBACK_REQUESTER_EMAIL: &str = "info@executasolutions.com";

/// Local priority key to Zendesk. Keys are matched exactly, so anything
/// else (lowercase names included) maps to `normal`.
pub fn priority_to_zendesk(priority: &str) -> &'static str {
    match priority {
        "LOW" => "low",
        "NORMAL" => "normal",
        "HIGH" => "high",
        "URGENT" => "urgent",
        _ => "normal",
    }
}

pub fn priority_from_zendesk(priority: Option<&str>) -> Priority {
    match priority {
        Some("low") => Priority::Low,
        Some("normal") => Priority::Normal,
        Some("high") => Priority::High,
        Some("urgent") => Priority::Urgent,
        _ => Priority::Normal,
    }
}

/// Local status key to Zendesk. Unmatched keys map to `open`.
pub fn status_to_zendesk(status: &str) -> &'static str {
    match status {
        "PENDING" => "new",
        "ASSIGNED" | "ACCEPTED" => "open",
        "IN_PROGRESS" => "pending",
        "RESOLVED" => "solved",
        "EXPIRED" => "closed",
        _ => "open",
    }
}

pub fn status_from_zendesk(status: Option<&str>) -> HandoffStatus {
    match status {
        Some("new") => HandoffStatus::Pending,
        Some("open") => HandoffStatus::Assigned,
        Some("pending") => HandoffStatus::InProgress,
        Some("solved") => HandoffStatus::Resolved,
        Some("closed") => HandoffStatus::Expired,
        _ => HandoffStatus::Pending,
    }
}

fn or_default<'a>(value: Option<&'a str>, fallback: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(fallback)
}

pub fn ticket_description(request: &HandoffRequest, session: &ChatSession, assistant_name: &str) -> String {
    format!(
        "Support request transferred from Executa AI Assistant\n\n\
         Customer Information:\n\
         - Name: {name}\n\
         - Email: {email}\n\
         - Phone: {phone}\n\n\
         AI Assistant: {assistant}\n\
         Handoff Reason: {reason}\n\
         Priority: {priority}\n\n\
         Original Customer Query:\n{query}\n\n\
         Context:\n{context}\n\n\
         ---\n\
         This ticket was automatically created from Executa AI handoff system.\n\
         Original ticket ID: {id}",
        name = or_default(session.customer_name.as_deref(), "Not provided"),
        email = or_default(session.customer_email.as_deref(), "Not provided"),
        phone = or_default(session.customer_phone.as_deref(), "Not provided"),
        assistant = assistant_name,
        reason = request.reason.subject_label(),
        priority = request.priority,
        query = or_default(request.customer_query.as_deref(), "No specific query provided"),
        context = or_default(request.context.as_deref(), "No additional context"),
        id = request.id,
    )
}

pub struct ZendeskClient {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    ticket_id_field: Option<i64>,
    assistant_name_field: Option<i64>,
}

impl ZendeskClient {
    /// `None` when domain, email or token is missing.
    pub fn from_config(config: &ZendeskConfig, http: reqwest::Client) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let domain = config.domain.as_deref()?.trim().trim_end_matches('/');
        let base_url = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{}", domain)
        };
        let credentials = format!(
            "{}/token:{}",
            config.email.as_deref()?,
            config.api_token.as_deref()?
        );

        Some(Self {
            http,
            base_url,
            authorization: format!("Basic {}", STANDARD.encode(credentials)),
            ticket_id_field: config.executa_ticket_id_field,
            assistant_name_field: config.assistant_name_field,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> ExecutaResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExecutaError::ZendeskApi {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }

    pub fn ticket_payload(
        &self,
        request: &HandoffRequest,
        session: &ChatSession,
        assistant_name: &str,
        assignee_id: Option<i64>,
    ) -> Value {
        let mut custom_fields = Vec::new();
        if let Some(id) = self.ticket_id_field {
            custom_fields.push(json!({ "id": id, "value": request.id }));
        }
        if let Some(id) = self.assistant_name_field {
            custom_fields.push(json!({ "id": id, "value": assistant_name }));
        }

        let mut ticket = json!({
            "subject": format!(
                "[Executa-{}] {} - {} Priority",
                request.id,
                request.reason.subject_label(),
                request.priority
            ),
            "description": ticket_description(request, session, assistant_name),
            "priority": priority_to_zendesk(request.priority.as_str()),
            "status": status_to_zendesk(request.status.as_str()),
            "requester": {
                "name": or_default(session.customer_name.as_deref(), "Customer"),
                "email": or_default(session.customer_email.as_deref(), FALLBACK_REQUESTER_EMAIL),
            },
            "custom_fields": custom_fields,
            "tags": ["executa", "ai-handoff", request.reason.as_str().to_lowercase()],
        });
        if let (Some(assignee), Some(fields)) = (assignee_id, ticket.as_object_mut()) {
            fields.insert("assignee_id".to_string(), json!(assignee));
        }

        json!({ "ticket": ticket })
    }

    /// Returns the created ticket object.
    pub async fn create_ticket(&self, payload: &Value) -> ExecutaResult<Value> {
        let response = self
            .http
            .post(format!("{}/api/v2/tickets.json", self.base_url))
            .header("Authorization", &self.authorization)
            .json(payload)
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        Ok(body.get("ticket").cloned().unwrap_or(Value::Null))
    }

    pub async fn get_ticket(&self, ticket_id: i64) -> ExecutaResult<Value> {
        let response = self
            .http
            .get(format!("{}/api/v2/tickets/{}.json", self.base_url, ticket_id))
            .header("Authorization", &self.authorization)
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        body.get("ticket")
            .cloned()
            .ok_or_else(|| ExecutaError::ApiParseError("Zendesk response has no ticket".to_string()))
    }

    pub async fn update_ticket(&self, ticket_id: i64, payload: &Value) -> ExecutaResult<()> {
        let response = self
            .http
            .put(format!("{}/api/v2/tickets/{}.json", self.base_url, ticket_id))
            .header("Authorization", &self.authorization)
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Any failure is treated as "no such user".
    pub async fn find_user_id(&self, email: &str) -> Option<i64> {
        let response = self
            .http
            .get(format!("{}/api/v2/users/search.json", self.base_url))
            .query(&[("query", email)])
            .header("Authorization", &self.authorization)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "Zendesk user search failed");
            return None;
        }
        let body: Value = response.json().await.ok()?;
        body["users"][0]["id"].as_i64()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedZendeskTicket {
    pub zendesk_ticket: Value,
    pub executa_ticket_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedFromZendesk {
    pub executa_ticket: Uuid,
    pub synced_status: HandoffStatus,
    pub synced_priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedToZendesk {
    pub zendesk_ticket_id: i64,
    pub executa_ticket_id: Uuid,
}

pub struct ZendeskService {
    repos: Repositories,
    client: Option<ZendeskClient>,
}

impl ZendeskService {
    pub fn new(repos: Repositories, client: Option<ZendeskClient>) -> Self {
        Self { repos, client }
    }

    fn client(&self) -> ExecutaResult<&ZendeskClient> {
        self.client.as_ref().ok_or(ExecutaError::ZendeskNotConfigured)
    }

    pub async fn create_ticket(
        &self,
        account_id: Uuid,
        ticket_id: Uuid,
    ) -> ExecutaResult<CreatedZendeskTicket> {
        let ticket = account_ticket(&self.repos, account_id, ticket_id).await?;
        let client = self.client()?;

        let session = self
            .repos
            .sessions
            .get_session(&ticket.session_id)
            .await?
            .ok_or_else(|| ExecutaError::SessionNotFound(ticket.session_id.clone()))?;
        let assistant = self
            .repos
            .assistants
            .get_assistant(ticket.assistant_id)
            .await?
            .ok_or_else(|| ExecutaError::AssistantNotFound(ticket.assistant_id.to_string()))?;

        let assignee_id = match ticket.assigned_agent_id {
            Some(agent_id) => match self.repos.agents.get_agent(agent_id).await? {
                Some(agent) => client.find_user_id(&agent.email).await,
                None => None,
            },
            None => None,
        };

        let payload = client.ticket_payload(&ticket, &session, &assistant.name, assignee_id);
        let created = client.create_ticket(&payload).await?;

        let zendesk_id = created["id"]
            .as_i64()
            .ok_or_else(|| ExecutaError::ApiParseError("Zendesk ticket has no id".to_string()))?;
        let zendesk_url = created["url"].as_str().unwrap_or_default();
        self.repos
            .handoffs
            .set_zendesk_link(ticket.id, zendesk_id, zendesk_url)
            .await?;

        info!(handoff_id = %ticket.id, zendesk_ticket_id = zendesk_id, "Zendesk ticket created");
        Ok(CreatedZendeskTicket {
            zendesk_ticket: created,
            executa_ticket_id: ticket.id,
        })
    }

    pub async fn sync_from(
        &self,
        account_id: Uuid,
        zendesk_ticket_id: i64,
    ) -> ExecutaResult<SyncedFromZendesk> {
        let client = self.client()?;
        let remote = client.get_ticket(zendesk_ticket_id).await?;

        let mut ticket = self
            .repos
            .handoffs
            .find_by_zendesk_id(account_id, zendesk_ticket_id)
            .await?
            .ok_or(ExecutaError::LinkedTicketNotFound(zendesk_ticket_id))?;

        let remote_status = remote["status"].as_str();
        ticket.status = status_from_zendesk(remote_status);
        ticket.priority = priority_from_zendesk(remote["priority"].as_str());
        if remote_status == Some("solved") {
            let updated_at = remote["updated_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            ticket.resolved_at = Some(updated_at);
        }

        let updated = self
            .repos
            .handoffs
            .apply_ticket_update(&TicketUpdate {
                request: ticket,
                session_status: None,
                notice: None,
            })
            .await?;

        Ok(SyncedFromZendesk {
            executa_ticket: updated.id,
            synced_status: updated.status,
            synced_priority: updated.priority,
        })
    }

    /// `extra` fields override the mapped status and priority.
    pub async fn sync_to(
        &self,
        account_id: Uuid,
        ticket_id: Uuid,
        extra: Option<&Value>,
    ) -> ExecutaResult<SyncedToZendesk> {
        let ticket = account_ticket(&self.repos, account_id, ticket_id).await?;
        let zendesk_id = ticket
            .zendesk_ticket_id
            .ok_or_else(|| ExecutaError::TicketNotLinked(ticket.id.to_string()))?;
        let client = self.client()?;

        let mut fields = serde_json::Map::new();
        fields.insert("status".into(), json!(status_to_zendesk(ticket.status.as_str())));
        fields.insert("priority".into(), json!(priority_to_zendesk(ticket.priority.as_str())));
        match extra {
            Some(Value::Object(extra)) => {
                fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(Value::Null) | None => {}
            Some(other) => warn!("Ignoring non-object Zendesk update data: {}", other),
        }

        client
            .update_ticket(zendesk_id, &json!({ "ticket": fields }))
            .await?;

        Ok(SyncedToZendesk {
            zendesk_ticket_id: zendesk_id,
            executa_ticket_id: ticket.id,
        })
    }
}
