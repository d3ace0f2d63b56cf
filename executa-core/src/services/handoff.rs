//! Escalating a conversation to a human.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{account_assistant, resolve_assignee, AssignedPerson};
use crate::assignment;
use crate::business_hours::is_open_at;
use crate::config::ExecutaConfig;
use crate::error::{ExecutaError, ExecutaResult};
use crate::events::{TicketEventKind, TicketEvents};
use crate::models::{
    Assistant, ChatMessage, ChatSession, CustomerInfo, HandoffReason, HandoffRequest,
    HandoffStatus, MessageSender, Priority, User,
};
use crate::notify::{plan_notifications, HandoffNotice};
use crate::outbox::OutboxProcessor;
use crate::repo::{HandoffDraft, Repositories};
use crate::settings::{HandoffMethod, HandoffSettings, SettingsSummary};
use crate::triggers::{self, ConversationContext, TriggerEvaluation};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHandoff {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub reason: HandoffReason,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub customer_query: Option<String>,
    #[serde(default)]
    pub customer_info: Option<CustomerInfo>,
    /// Replaces the assistant's stored settings for this request only.
    #[serde(default)]
    pub handoff_settings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffCreated {
    pub handoff_id: Uuid,
    pub message: String,
    pub estimated_wait_time: u32,
    pub business_hours_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffStatusView {
    pub status: HandoffStatus,
    pub assigned_to: AssignedPerson,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffSettingsView {
    pub handoff_enabled: bool,
    pub handoff_settings: HandoffSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub context: ConversationContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvaluation {
    pub message: String,
    pub evaluation: TriggerEvaluation,
    pub settings: SettingsSummary,
}

pub struct HandoffService {
    repos: Repositories,
    events: TicketEvents,
    outbox: Arc<OutboxProcessor>,
    from_email: String,
    max_attempts: u32,
    estimated_wait_minutes: u32,
}

impl HandoffService {
    pub fn new(
        repos: Repositories,
        events: TicketEvents,
        outbox: Arc<OutboxProcessor>,
        config: &ExecutaConfig,
    ) -> Self {
        Self {
            repos,
            events,
            outbox,
            from_email: config.email.handoff_from_email.clone(),
            max_attempts: config.notifications.max_attempts,
            estimated_wait_minutes: config.handoff.estimated_wait_minutes,
        }
    }

    pub async fn create(
        &self,
        caller: &User,
        assistant_id: Uuid,
        input: CreateHandoff,
    ) -> ExecutaResult<HandoffCreated> {
        let assistant = account_assistant(&self.repos, caller, assistant_id).await?;
        if !assistant.handoff_enabled {
            return Err(ExecutaError::HandoffNotEnabled(assistant.id.to_string()));
        }
        let session_id = input.session_id.trim();
        if session_id.is_empty() {
            return Err(ExecutaError::validation("Session ID required"));
        }
        let settings = match &input.handoff_settings {
            Some(value) => HandoffSettings::from_value(value)?,
            None => assistant.settings()?,
        };
        settings.validate()?;

        let (session, transcript) = match self.repos.sessions.get_session(session_id).await? {
            Some(existing) if existing.account_id != caller.account_id => {
                return Err(ExecutaError::SessionNotFound(session_id.to_string()));
            }
            Some(existing) => {
                let transcript = if settings.email_settings.include_conversation_history {
                    self.repos.sessions.list_messages(session_id).await?
                } else {
                    Vec::new()
                };
                (existing, transcript)
            }
            None => {
                let mut session = ChatSession::new(session_id, caller.account_id, assistant.id);
                if let Some(info) = &input.customer_info {
                    session = session.with_customer(info);
                }
                (session, Vec::new())
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
        .with_snapshot(settings.to_value()?);

        let notice = ChatMessage::system(
            session_id,
            assistant.id,
            MessageSender::AiAssistant,
            settings.handoff_message.clone(),
        );
        let outbox = plan_notifications(
            &settings,
            &HandoffNotice {
                assistant: &assistant,
                request: &request,
                session: &session,
                transcript: &transcript,
            },
            &self.from_email,
            self.max_attempts,
        )?;
        let outbox_ids: Vec<Uuid> = outbox.iter().map(|e| e.id).collect();

        self.repos
            .handoffs
            .create_handoff(&HandoffDraft {
                session,
                request: request.clone(),
                notice,
                outbox,
            })
            .await?;

        info!(
            handoff_id = %request.id,
            assistant_id = %assistant.id,
            method = %settings.handoff_method,
            notifications = outbox_ids.len(),
            "Handoff request created"
        );
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

        let open = is_open_at(&settings.business_hours, Utc::now());
        let assigned_agent_id = if settings.handoff_method == HandoffMethod::InternalNotification
            && settings.assignment.auto_assign
            && open
        {
            match self.auto_assign(&request, &settings).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(handoff_id = %request.id, error = %e, "Automatic assignment failed");
                    None
                }
            }
        } else {
            None
        };

        if !outbox_ids.is_empty() {
            self.outbox.spawn_immediate(outbox_ids);
        }

        let message = if open {
            settings.customer_wait_message
        } else {
            settings.offline_message
        };

        Ok(HandoffCreated {
            handoff_id: request.id,
            message,
            estimated_wait_time: self.estimated_wait_minutes,
            business_hours_open: open,
            assigned_agent_id,
        })
    }

    /// Routes a fresh request to an online agent. Returns the agent that got it.
    async fn auto_assign(
        &self,
        request: &HandoffRequest,
        settings: &HandoffSettings,
    ) -> ExecutaResult<Option<Uuid>> {
        let loads = self.repos.agents.agent_loads(request.account_id).await?;
        let Some(choice) = assignment::pick(
            settings.assignment.assignment_method,
            &loads,
            &settings.assignment.required_skills,
        ) else {
            debug!(handoff_id = %request.id, candidates = loads.len(), "No agent has capacity");
            return Ok(None);
        };

        let agent = &choice.agent;
        let assigned = self
            .repos
            .handoffs
            .assign_if_pending(request.id, agent.id, Utc::now())
            .await?;
        if !assigned {
            debug!(
                handoff_id = %request.id,
                agent_id = %agent.id,
                "Request already assigned or agent reached capacity"
            );
            return Ok(None);
        }

        info!(handoff_id = %request.id, agent_id = %agent.id, load = choice.load, "Handoff assigned");
        self.events.emit(
            TicketEventKind::TicketUpdated,
            request.account_id,
            request.id,
            serde_json::json!({
                "status": HandoffStatus::Assigned,
                "assignedTo": { "name": agent.name, "email": agent.email },
            }),
        );
        Ok(Some(agent.id))
    }

    /// Latest request for a session. Public: the chat widget polls it.
    pub async fn status(
        &self,
        assistant_id: Uuid,
        session_id: Option<&str>,
    ) -> ExecutaResult<HandoffStatusView> {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExecutaError::validation("Session ID required"))?;

        let request = self
            .repos
            .handoffs
            .latest_for_session(assistant_id, session_id)
            .await?
            .ok_or_else(|| ExecutaError::HandoffRequestNotFound(session_id.to_string()))?;

        Ok(HandoffStatusView {
            status: request.status,
            assigned_to: resolve_assignee(&self.repos, &request).await?,
            created_at: request.created_at,
        })
    }

    pub async fn get_settings(
        &self,
        caller: &User,
        assistant_id: Uuid,
    ) -> ExecutaResult<HandoffSettingsView> {
        let assistant = account_assistant(&self.repos, caller, assistant_id).await?;
        Ok(HandoffSettingsView {
            handoff_enabled: assistant.handoff_enabled,
            handoff_settings: assistant.settings()?,
        })
    }

    /// Stores settings at the current version. They are only validated while
    /// handoff is enabled.
    pub async fn update_settings(
        &self,
        caller: &User,
        assistant_id: Uuid,
        handoff_enabled: bool,
        settings: &serde_json::Value,
    ) -> ExecutaResult<HandoffSettingsView> {
        account_assistant(&self.repos, caller, assistant_id).await?;

        let settings = HandoffSettings::from_value(settings)?;
        if handoff_enabled {
            settings.validate()?;
        }

        let updated = self
            .repos
            .assistants
            .update_handoff_settings(assistant_id, handoff_enabled, &settings.to_value()?)
            .await?
            .ok_or_else(|| ExecutaError::AssistantNotFound(assistant_id.to_string()))?;

        info!(assistant_id = %assistant_id, handoff_enabled, "Handoff settings updated");
        Ok(HandoffSettingsView {
            handoff_enabled: updated.handoff_enabled,
            handoff_settings: settings,
        })
    }

    pub async fn evaluate(
        &self,
        caller: &User,
        assistant_id: Uuid,
        input: &EvaluateMessage,
    ) -> ExecutaResult<MessageEvaluation> {
        let assistant: Assistant = account_assistant(&self.repos, caller, assistant_id).await?;
        let settings = assistant.settings()?;
        let evaluation = triggers::evaluate(&input.message, &settings, &input.context);

        Ok(MessageEvaluation {
            message: input.message.clone(),
            evaluation,
            settings: settings.summary(),
        })
    }
}
