//! The support ticket inbox: listing, detail, manual creation and the
//! operator actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{account_assistant, account_ticket, resolve_assignee, AssignedPerson};
use crate::error::{ExecutaError, ExecutaResult};
use crate::events::{TicketEventKind, TicketEvents};
use crate::models::{
    ChatMessage, ChatSession, ChatSessionStatus, CustomerInfo, HandoffReason, HandoffRequest,
    HandoffStatus, MessageSender, MessageType, Priority, User,
};
use crate::repo::{HandoffDraft, Repositories, TicketFilter, TicketSummary, TicketUpdate};

const TRANSFER_NOTICE: &str = "Your conversation has been transferred to our support team. \
                               A human agent will be with you shortly.";
const RESOLVED_NOTICE: &str = "This support ticket has been resolved. Thank you for contacting us!";
const CLOSED_NOTICE: &str = "This conversation has been closed.";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub assigned_to_me: bool,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TicketQuery {
    fn filter(&self) -> ExecutaResult<TicketFilter> {
        let status = match wanted(&self.status) {
            Some(s) => Some(
                s.parse::<HandoffStatus>()
                    .map_err(|_| ExecutaError::validation(format!("Invalid status '{}'", s)))?,
            ),
            None => None,
        };
        let priority = match wanted(&self.priority) {
            Some(p) => Some(
                p.parse::<Priority>()
                    .map_err(|_| ExecutaError::validation(format!("Invalid priority '{}'", p)))?,
            ),
            None => None,
        };

        let defaults = TicketFilter::default();
        Ok(TicketFilter {
            status,
            priority,
            assigned_agent_id: None,
            page: self.page.filter(|p| *p > 0).unwrap_or(defaults.page),
            limit: self.limit.filter(|l| *l > 0).unwrap_or(defaults.limit).min(100),
        })
    }
}

/// `None` for absent, blank or `all`.
fn wanted(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListItem {
    pub id: Uuid,
    pub status: HandoffStatus,
    pub priority: Priority,
    pub reason: HandoffReason,
    pub customer: Customer,
    pub assistant: AssistantRef,
    pub assigned_agent: Option<AgentRef>,
    pub context: Option<String>,
    pub customer_query: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub channel: String,
    pub message_count: i64,
    pub last_activity: DateTime<Utc>,
    pub session_id: String,
    pub zendesk_ticket_id: Option<i64>,
}

impl From<TicketSummary> for TicketListItem {
    fn from(summary: TicketSummary) -> Self {
        let request = summary.request;
        Self {
            id: request.id,
            status: request.status,
            priority: request.priority,
            reason: request.reason,
            customer: Customer {
                name: summary.customer_name,
                email: summary.customer_email,
                phone: summary.customer_phone,
            },
            assistant: AssistantRef {
                id: request.assistant_id,
                name: summary.assistant_name,
            },
            assigned_agent: request.assigned_agent_id.map(|id| AgentRef {
                id,
                name: summary.agent_name,
                email: summary.agent_email,
            }),
            context: request.context,
            customer_query: request.customer_query,
            created_at: request.created_at,
            updated_at: request.updated_at,
            assigned_at: request.assigned_at,
            accepted_at: request.accepted_at,
            resolved_at: request.resolved_at,
            channel: summary.channel,
            message_count: summary.message_count,
            last_activity: summary.last_message_at.unwrap_or(request.created_at),
            session_id: request.session_id,
            zendesk_ticket_id: request.zendesk_ticket_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit_i - 1) / limit_i,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketPage {
    pub tickets: Vec<TicketListItem>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicket {
    pub assistant_id: Option<Uuid>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: HandoffReason,
    #[serde(default)]
    pub priority: Priority,
    pub context: Option<String>,
    pub customer_query: Option<String>,
    pub customer_info: Option<CustomerInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: HandoffRequest,
    pub assistant: AssistantRef,
    pub assigned_to: AssignedPerson,
    pub session: SessionView,
}

/// Body of `PUT /api/support/tickets/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketActionRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: ActionData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionData {
    pub resolution_notes: Option<String>,
    pub content: Option<String>,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: Uuid,
    pub content: String,
    pub sender: MessageSender,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TicketActionOutcome {
    Ticket { ticket: HandoffRequest },
    Message { message: AgentMessage },
}

pub struct TicketService {
    repos: Repositories,
    events: TicketEvents,
}

impl TicketService {
    pub fn new(repos: Repositories, events: TicketEvents) -> Self {
        Self { repos, events }
    }

    pub async fn list(&self, caller: &User, query: &TicketQuery) -> ExecutaResult<TicketPage> {
        let mut filter = query.filter()?;

        if query.assigned_to_me {
            match self.repos.agents.find_agent_by_user(caller.id).await? {
                Some(agent) => filter.assigned_agent_id = Some(agent.id),
                None => {
                    return Ok(TicketPage {
                        tickets: Vec::new(),
                        pagination: Pagination::new(filter.page, filter.limit, 0),
                    });
                }
            }
        }

        let (tickets, total) = self
            .repos
            .handoffs
            .list_tickets(caller.account_id, &filter)
            .await?;

        Ok(TicketPage {
            tickets: tickets.into_iter().map(TicketListItem::from).collect(),
            pagination: Pagination::new(filter.page, filter.limit, total),
        })
    }

    pub async fn create(&self, caller: &User, input: CreateTicket) -> ExecutaResult<HandoffRequest> {
        let (Some(assistant_id), Some(session_id)) = (
            input.assistant_id,
            input.session_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        ) else {
            return Err(ExecutaError::validation("assistantId and sessionId are required"));
        };

        let assistant = account_assistant(&self.repos, caller, assistant_id).await?;

        let session = match self.repos.sessions.get_session(session_id).await? {
            Some(existing) if existing.account_id != caller.account_id => {
                return Err(ExecutaError::SessionNotFound(session_id.to_string()));
            }
            Some(existing) => existing,
            None => {
                let info = input.customer_info.clone().unwrap_or_default();
                ChatSession::new(session_id, caller.account_id, assistant.id).with_customer(&info)
            }
        };

        let request = HandoffRequest::new(
            caller.account_id,
            session_id,
            assistant.id,
            input.reason,
            input.priority,
        )
        .with_context(input.context, input.customer_query)
        .with_snapshot(assistant.handoff_settings.clone());

        let notice = ChatMessage::system(
            session_id,
            assistant.id,
            MessageSender::System,
            TRANSFER_NOTICE,
        );

        self.repos
            .handoffs
            .create_handoff(&HandoffDraft {
                session,
                request: request.clone(),
                notice,
                outbox: Vec::new(),
            })
            .await?;

        info!(handoff_id = %request.id, created_by = %caller.id, "Support ticket created");
        self.events.emit(
            TicketEventKind::NewTicket,
            request.account_id,
            request.id,
            serde_json::json!({
                "status": request.status,
                "priority": request.priority,
                "reason": request.reason,
                "assistantName": assistant.name,
                "sessionId": request.session_id,
            }),
        );

        Ok(request)
    }

    pub async fn detail(&self, caller: &User, ticket_id: Uuid) -> ExecutaResult<TicketDetail> {
        let ticket = account_ticket(&self.repos, caller.account_id, ticket_id).await?;

        let assistant_name = self
            .repos
            .assistants
            .get_assistant(ticket.assistant_id)
            .await?
            .map(|a| a.name)
            .unwrap_or_default();
        let session = self.repos.sessions.get_session(&ticket.session_id).await?;
        let messages = self.repos.sessions.list_messages(&ticket.session_id).await?;
        let assigned_to = resolve_assignee(&self.repos, &ticket).await?;

        let session = SessionView {
            id: ticket.session_id.clone(),
            customer_name: session.as_ref().and_then(|s| s.customer_name.clone()),
            customer_email: session.as_ref().and_then(|s| s.customer_email.clone()),
            customer_phone: session.as_ref().and_then(|s| s.customer_phone.clone()),
            messages,
        };

        Ok(TicketDetail {
            assistant: AssistantRef {
                id: ticket.assistant_id,
                name: assistant_name,
            },
            assigned_to,
            session,
            ticket,
        })
    }

    /// Operator actions. Only the account owner may run them.
    pub async fn apply_action(
        &self,
        caller: &User,
        ticket_id: Uuid,
        input: &TicketActionRequest,
    ) -> ExecutaResult<TicketActionOutcome> {
        let mut ticket = account_ticket(&self.repos, caller.account_id, ticket_id).await?;
        if !caller.is_owner() {
            return Err(ExecutaError::Forbidden(
                "Only account owner can manage tickets".to_string(),
            ));
        }

        let now = Utc::now();
        let (session_status, notice, event_data) = match input.action.as_str() {
            "accept" => {
                ticket.status = HandoffStatus::Accepted;
                ticket.assigned_at = Some(now);
                ticket.accepted_at = Some(now);
                (
                    ChatSessionStatus::Transferred,
                    format!("{} has joined the conversation and will assist you.", caller.name),
                    serde_json::json!({
                        "status": HandoffStatus::Accepted,
                        "assignedTo": { "name": caller.name, "email": caller.email },
                    }),
                )
            }
            "resolve" => {
                ticket.status = HandoffStatus::Resolved;
                ticket.resolved_at = Some(now);
                if let Some(notes) = input
                    .data
                    .resolution_notes
                    .as_deref()
                    .filter(|n| !n.trim().is_empty())
                {
                    ticket.context = Some(match ticket.context.take() {
                        Some(context) => format!("{}\n\nResolution: {}", context, notes),
                        None => format!("Resolution: {}", notes),
                    });
                }
                (
                    ChatSessionStatus::Resolved,
                    RESOLVED_NOTICE.to_string(),
                    serde_json::json!({ "status": HandoffStatus::Resolved, "resolvedAt": now }),
                )
            }
            "close" => {
                ticket.status = HandoffStatus::Resolved;
                ticket.resolved_at = Some(now);
                (
                    ChatSessionStatus::Resolved,
                    CLOSED_NOTICE.to_string(),
                    serde_json::json!({ "status": HandoffStatus::Resolved, "resolvedAt": now }),
                )
            }
            "add_message" => return self.add_message(caller, &ticket, &input.data).await,
            other => return Err(ExecutaError::InvalidTicketAction(other.to_string())),
        };

        let notice = ChatMessage::system(
            ticket.session_id.clone(),
            ticket.assistant_id,
            MessageSender::System,
            notice,
        );
        let updated = self
            .repos
            .handoffs
            .apply_ticket_update(&TicketUpdate {
                request: ticket,
                session_status: Some(session_status),
                notice: Some(notice),
            })
            .await?;

        info!(
            handoff_id = %updated.id,
            action = %input.action,
            status = %updated.status,
            "Ticket updated"
        );
        self.events.emit(
            TicketEventKind::TicketUpdated,
            updated.account_id,
            updated.id,
            event_data,
        );

        Ok(TicketActionOutcome::Ticket { ticket: updated })
    }

    async fn add_message(
        &self,
        caller: &User,
        ticket: &HandoffRequest,
        data: &ActionData,
    ) -> ExecutaResult<TicketActionOutcome> {
        let content = data
            .content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ExecutaError::validation("Message content is required"))?;

        let message = ChatMessage::new(
            ticket.session_id.clone(),
            Some(ticket.assistant_id),
            content,
            MessageType::Text,
            MessageSender::HumanAgent,
        )
        .internal(data.is_internal);
        let message = self.repos.sessions.append_message(&message).await?;

        let view = AgentMessage {
            id: message.id,
            content: message.content,
            sender: message.sender,
            sender_name: caller.name.clone(),
            timestamp: message.created_at,
            is_internal: message.is_internal,
        };
        self.events.emit(
            TicketEventKind::NewMessage,
            ticket.account_id,
            ticket.id,
            serde_json::to_value(&view)?,
        );

        Ok(TicketActionOutcome::Message { message: view })
    }
}
