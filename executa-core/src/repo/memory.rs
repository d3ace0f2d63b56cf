use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::outbox_repo::lease_until;
use super::{
    AgentStore, AssistantStore, HandoffDraft, HandoffStore, OutboxFilter, OutboxStore,
    SessionStore, TicketFilter, TicketSummary, TicketUpdate, UserStore,
};
use crate::assignment::AgentLoad;
use crate::error::{ExecutaError, ExecutaResult};
use crate::models::{
    Account, Assistant, ChatMessage, ChatSession, HandoffRequest, HumanAgent, OutboxEntry,
    OutboxStatus, User, UserRole,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    users: Vec<User>,
    assistants: HashMap<Uuid, Assistant>,
    sessions: HashMap<String, ChatSession>,
    messages: Vec<ChatMessage>,
    // Insertion order doubles as creation order.
    handoffs: Vec<HandoffRequest>,
    agents: Vec<HumanAgent>,
    outbox: Vec<OutboxEntry>,
}

impl State {
    fn handoff_mut(&mut self, id: Uuid) -> ExecutaResult<&mut HandoffRequest> {
        self.handoffs
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| ExecutaError::HandoffRequestNotFound(id.to_string()))
    }

    fn outbox_mut(&mut self, id: Uuid) -> ExecutaResult<&mut OutboxEntry> {
        self.outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ExecutaError::OutboxEntryNotFound(id.to_string()))
    }

    fn summarize(&self, request: &HandoffRequest) -> TicketSummary {
        let session = self.sessions.get(&request.session_id);
        let agent = request
            .assigned_agent_id
            .and_then(|id| self.agents.iter().find(|a| a.id == id));
        let transcript = self
            .messages
            .iter()
            .filter(|m| m.session_id == request.session_id);

        TicketSummary {
            request: request.clone(),
            assistant_name: self
                .assistants
                .get(&request.assistant_id)
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            customer_name: session.and_then(|s| s.customer_name.clone()),
            customer_email: session.and_then(|s| s.customer_email.clone()),
            customer_phone: session.and_then(|s| s.customer_phone.clone()),
            channel: session
                .map(|s| s.channel.clone())
                .unwrap_or_else(|| "web".to_string()),
            agent_name: agent.map(|a| a.name.clone()),
            agent_email: agent.map(|a| a.email.clone()),
            message_count: transcript.clone().count() as i64,
            last_message_at: transcript.map(|m| m.created_at).max(),
        }
    }
}

/// Keeps every aggregate behind one lock so multi-row writes are atomic,
/// matching the transactions of the PostgreSQL repositories.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> ExecutaResult<Account> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&account.id) {
            return Err(ExecutaError::AlreadyExists(format!("account {}", account.id)));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn insert_user(&self, user: &User) -> ExecutaResult<User> {
        let mut state = self.state.write().await;
        if state
            .users
            .iter()
            .any(|u| u.id == user.id || u.api_key == user.api_key)
        {
            return Err(ExecutaError::AlreadyExists(format!("user {}", user.email)));
        }
        state.users.push(user.clone());
        Ok(user.clone())
    }

    async fn get_user(&self, id: Uuid) -> ExecutaResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> ExecutaResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.iter().find(|u| u.api_key == api_key).cloned())
    }

    async fn find_owner(&self, account_id: Uuid) -> ExecutaResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .filter(|u| u.account_id == account_id && u.role == UserRole::Owner)
            .min_by_key(|u| u.created_at)
            .cloned())
    }
}

#[async_trait]
impl AssistantStore for MemoryStore {
    async fn insert_assistant(&self, assistant: &Assistant) -> ExecutaResult<Assistant> {
        let mut state = self.state.write().await;
        state.assistants.insert(assistant.id, assistant.clone());
        Ok(assistant.clone())
    }

    async fn get_assistant(&self, id: Uuid) -> ExecutaResult<Option<Assistant>> {
        let state = self.state.read().await;
        Ok(state.assistants.get(&id).cloned())
    }

    async fn update_handoff_settings(
        &self,
        id: Uuid,
        enabled: bool,
        settings: &serde_json::Value,
    ) -> ExecutaResult<Option<Assistant>> {
        let mut state = self.state.write().await;
        let Some(assistant) = state.assistants.get_mut(&id) else {
            return Ok(None);
        };
        assistant.handoff_enabled = enabled;
        assistant.handoff_settings = settings.clone();
        assistant.updated_at = Utc::now();
        Ok(Some(assistant.clone()))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &ChatSession) -> ExecutaResult<ChatSession> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&session.id) {
            return Err(ExecutaError::AlreadyExists(format!("session {}", session.id)));
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, id: &str) -> ExecutaResult<Option<ChatSession>> {
        let state = self.state.read().await;
        Ok(state.sessions.get(id).cloned())
    }

    async fn append_message(&self, message: &ChatMessage) -> ExecutaResult<ChatMessage> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&message.session_id) {
            return Err(ExecutaError::SessionNotFound(message.session_id.clone()));
        }
        state.messages.push(message.clone());
        Ok(message.clone())
    }

    async fn list_messages(&self, session_id: &str) -> ExecutaResult<Vec<ChatMessage>> {
        let state = self.state.read().await;
        let mut messages: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[async_trait]
impl HandoffStore for MemoryStore {
    async fn create_handoff(&self, draft: &HandoffDraft) -> ExecutaResult<ChatSession> {
        let mut state = self.state.write().await;
        if !state.assistants.contains_key(&draft.request.assistant_id) {
            return Err(ExecutaError::AssistantNotFound(
                draft.request.assistant_id.to_string(),
            ));
        }

        let session = state
            .sessions
            .entry(draft.session.id.clone())
            .or_insert_with(|| draft.session.clone());
        session.transfer();
        session.updated_at = Utc::now();
        let transferred = session.clone();

        state.handoffs.push(draft.request.clone());
        state.messages.push(draft.notice.clone());
        state.outbox.extend(draft.outbox.iter().cloned());

        Ok(transferred)
    }

    async fn get_handoff(&self, id: Uuid) -> ExecutaResult<Option<HandoffRequest>> {
        let state = self.state.read().await;
        Ok(state.handoffs.iter().find(|h| h.id == id).cloned())
    }

    async fn latest_for_session(
        &self,
        assistant_id: Uuid,
        session_id: &str,
    ) -> ExecutaResult<Option<HandoffRequest>> {
        let state = self.state.read().await;
        Ok(state
            .handoffs
            .iter()
            .rev()
            .find(|h| h.assistant_id == assistant_id && h.session_id == session_id)
            .cloned())
    }

    async fn list_tickets(
        &self,
        account_id: Uuid,
        filter: &TicketFilter,
    ) -> ExecutaResult<(Vec<TicketSummary>, i64)> {
        let state = self.state.read().await;
        let matching: Vec<&HandoffRequest> = state
            .handoffs
            .iter()
            .rev()
            .filter(|h| h.account_id == account_id)
            .filter(|h| filter.status.is_none_or(|s| h.status == s))
            .filter(|h| filter.priority.is_none_or(|p| h.priority == p))
            .filter(|h| {
                filter
                    .assigned_agent_id
                    .is_none_or(|id| h.assigned_agent_id == Some(id))
            })
            .collect();

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .map(|h| state.summarize(h))
            .collect();

        Ok((page, total))
    }

    async fn apply_ticket_update(&self, update: &TicketUpdate) -> ExecutaResult<HandoffRequest> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let stored = state.handoff_mut(update.request.id)?;
        stored.priority = update.request.priority;
        stored.status = update.request.status;
        stored.context = update.request.context.clone();
        stored.assigned_agent_id = update.request.assigned_agent_id;
        stored.assigned_at = update.request.assigned_at;
        stored.accepted_at = update.request.accepted_at;
        stored.resolved_at = update.request.resolved_at;
        stored.updated_at = now;
        let updated = stored.clone();

        if let Some(status) = update.session_status {
            if let Some(session) = state.sessions.get_mut(&updated.session_id) {
                session.status = status;
                session.updated_at = now;
            }
        }

        if let Some(notice) = &update.notice {
            state.messages.push(notice.clone());
        }

        Ok(updated)
    }

    async fn assign_if_pending(
        &self,
        request_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> ExecutaResult<bool> {
        let mut state = self.state.write().await;

        let Some(max_chats) = state
            .agents
            .iter()
            .find(|a| a.id == agent_id)
            .map(|a| i64::from(a.max_chats))
        else {
            return Ok(false);
        };
        let Some(session_id) = state
            .handoffs
            .iter()
            .find(|h| h.id == request_id && h.is_assignable())
            .map(|h| h.session_id.clone())
        else {
            return Ok(false);
        };
        let load = state
            .sessions
            .values()
            .filter(|s| {
                s.assigned_agent_id == Some(agent_id) && s.counts_toward_load() && s.id != session_id
            })
            .count() as i64;
        if load >= max_chats {
            return Ok(false);
        }

        let Some(request) = state.handoffs.iter_mut().find(|h| h.id == request_id) else {
            return Ok(false);
        };
        request.assigned_agent_id = Some(agent_id);
        request.status = crate::models::HandoffStatus::Assigned;
        request.assigned_at = Some(at);
        request.updated_at = at;

        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.assigned_agent_id = Some(agent_id);
            session.updated_at = at;
        }
        if let Some(agent) = state.agents.iter_mut().find(|a| a.id == agent_id) {
            agent.last_assigned_at = Some(at);
        }

        Ok(true)
    }

    async fn find_by_zendesk_id(
        &self,
        account_id: Uuid,
        zendesk_ticket_id: i64,
    ) -> ExecutaResult<Option<HandoffRequest>> {
        let state = self.state.read().await;
        Ok(state
            .handoffs
            .iter()
            .find(|h| h.account_id == account_id && h.zendesk_ticket_id == Some(zendesk_ticket_id))
            .cloned())
    }

    async fn set_zendesk_link(
        &self,
        id: Uuid,
        zendesk_ticket_id: i64,
        zendesk_url: &str,
    ) -> ExecutaResult<()> {
        let mut state = self.state.write().await;
        let request = state.handoff_mut(id)?;
        request.zendesk_ticket_id = Some(zendesk_ticket_id);
        request.zendesk_url = Some(zendesk_url.to_string());
        request.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn list_agents(&self, account_id: Uuid) -> ExecutaResult<Vec<HumanAgent>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_agent(&self, id: Uuid) -> ExecutaResult<Option<HumanAgent>> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|a| a.id == id).cloned())
    }

    async fn find_agent_by_user(&self, user_id: Uuid) -> ExecutaResult<Option<HumanAgent>> {
        let state = self.state.read().await;
        Ok(state.agents.iter().find(|a| a.user_id == user_id).cloned())
    }

    async fn upsert_agent(&self, agent: &HumanAgent) -> ExecutaResult<HumanAgent> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.agents.iter_mut().find(|a| a.user_id == agent.user_id) {
            existing.name = agent.name.clone();
            existing.departments = agent.departments.clone();
            existing.skills = agent.skills.clone();
            existing.is_available = agent.is_available;
            existing.last_active = agent.last_active;
            return Ok(existing.clone());
        }
        state.agents.push(agent.clone());
        Ok(agent.clone())
    }

    async fn agent_loads(&self, account_id: Uuid) -> ExecutaResult<Vec<AgentLoad>> {
        let state = self.state.read().await;
        Ok(state
            .agents
            .iter()
            .filter(|a| a.account_id == account_id && a.can_take_chats())
            .map(|agent| {
                let load = state
                    .sessions
                    .values()
                    .filter(|s| s.assigned_agent_id == Some(agent.id) && s.counts_toward_load())
                    .count() as i64;
                AgentLoad::new(agent.clone(), load)
            })
            .collect())
    }

    async fn active_ticket_counts(&self, account_id: Uuid) -> ExecutaResult<HashMap<Uuid, i64>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for request in state
            .handoffs
            .iter()
            .filter(|h| h.account_id == account_id && h.status.is_open_for_agent())
        {
            if let Some(agent_id) = request.assigned_agent_id {
                *counts.entry(agent_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, entries: &[OutboxEntry]) -> ExecutaResult<()> {
        let mut state = self.state.write().await;
        state.outbox.extend(entries.iter().cloned());
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> ExecutaResult<Option<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|e| e.id == id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>> {
        let until = lease_until(now, lease)?;
        let mut state = self.state.write().await;

        let mut due: Vec<&mut OutboxEntry> =
            state.outbox.iter_mut().filter(|e| e.is_due(now)).collect();
        due.sort_by_key(|e| e.next_attempt_at);

        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|entry| {
                entry.next_attempt_at = until;
                entry.leased_until = Some(until);
                entry.clone()
            })
            .collect())
    }

    async fn claim_ids(
        &self,
        ids: &[Uuid],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>> {
        let until = lease_until(now, lease)?;
        let mut state = self.state.write().await;

        Ok(state
            .outbox
            .iter_mut()
            .filter(|e| ids.contains(&e.id) && e.is_due(now))
            .map(|entry| {
                entry.next_attempt_at = until;
                entry.leased_until = Some(until);
                entry.clone()
            })
            .collect())
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> ExecutaResult<()> {
        let mut state = self.state.write().await;
        let entry = state.outbox_mut(id)?;
        entry.status = OutboxStatus::Delivered;
        entry.delivered_at = Some(at);
        entry.attempts += 1;
        entry.last_error = None;
        entry.leased_until = None;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        dead: bool,
    ) -> ExecutaResult<()> {
        let mut state = self.state.write().await;
        let entry = state.outbox_mut(id)?;
        entry.status = if dead {
            OutboxStatus::Dead
        } else {
            OutboxStatus::Failed
        };
        entry.attempts = attempts;
        entry.last_error = Some(error.to_string());
        entry.next_attempt_at = next_attempt_at;
        entry.leased_until = None;
        Ok(())
    }

    async fn list_outbox(&self, filter: &OutboxFilter) -> ExecutaResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .rev()
            .filter(|e| filter.account_id.is_none_or(|id| e.account_id == id))
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .take(filter.limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn requeue(
        &self,
        account_id: Option<Uuid>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> ExecutaResult<OutboxEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id && account_id.is_none_or(|a| e.account_id == a))
            .ok_or_else(|| ExecutaError::OutboxEntryNotFound(id.to_string()))?;
        if !entry.can_requeue(now) {
            return Err(ExecutaError::OutboxEntryBusy(id.to_string()));
        }
        entry.status = OutboxStatus::Pending;
        entry.attempts = 0;
        entry.last_error = None;
        entry.next_attempt_at = now;
        Ok(entry.clone())
    }

    async fn requeue_dead(
        &self,
        account_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ExecutaResult<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for entry in state.outbox.iter_mut().filter(|e| {
            e.status == OutboxStatus::Dead && account_id.is_none_or(|a| e.account_id == a)
        }) {
            entry.status = OutboxStatus::Pending;
            entry.attempts = 0;
            entry.last_error = None;
            entry.next_attempt_at = now;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        HandoffReason, HandoffStatus, MessageSender, NotifyChannel, Priority,
    };

    async fn seeded() -> (MemoryStore, Assistant) {
        let store = MemoryStore::new();
        let account = Account::new("Acme");
        store.insert_account(&account).await.unwrap();
        let assistant = Assistant::new(account.id, "Helper");
        store.insert_assistant(&assistant).await.unwrap();
        (store, assistant)
    }

    fn draft(assistant: &Assistant, session_id: &str) -> HandoffDraft {
        let session = ChatSession::new(session_id, assistant.account_id, assistant.id);
        let request = HandoffRequest::new(
            assistant.account_id,
            session_id,
            assistant.id,
            HandoffReason::CustomerRequest,
            Priority::Normal,
        );
        let notice = ChatMessage::system(
            session_id,
            assistant.id,
            MessageSender::AiAssistant,
            "Connecting you",
        );
        HandoffDraft {
            session,
            request,
            notice,
            outbox: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_handoff_transfers_session() {
        let (store, assistant) = seeded().await;
        let session = store.create_handoff(&draft(&assistant, "s-1")).await.unwrap();

        assert!(session.is_handed_off);
        assert_eq!(store.list_messages("s-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_handoff_without_assistant_writes_nothing() {
        let (store, assistant) = seeded().await;
        let mut orphan = draft(&assistant, "s-2");
        orphan.request.assistant_id = Uuid::new_v4();

        assert!(store.create_handoff(&orphan).await.is_err());
        assert!(store.get_session("s-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assign_if_pending_only_once() {
        let (store, assistant) = seeded().await;
        let d = draft(&assistant, "s-3");
        store.create_handoff(&d).await.unwrap();

        let first = store
            .upsert_agent(&HumanAgent::new(assistant.account_id, Uuid::new_v4(), "Ann", "ann@acme.com"))
            .await
            .unwrap();
        let second = store
            .upsert_agent(&HumanAgent::new(assistant.account_id, Uuid::new_v4(), "Bo", "bo@acme.com"))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store.assign_if_pending(d.request.id, first.id, now).await.unwrap());
        assert!(!store.assign_if_pending(d.request.id, second.id, now).await.unwrap());

        let stored = store.get_handoff(d.request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HandoffStatus::Assigned);
        assert_eq!(stored.assigned_agent_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_assign_if_pending_respects_capacity() {
        let (store, assistant) = seeded().await;
        let mut agent = HumanAgent::new(assistant.account_id, Uuid::new_v4(), "Ann", "ann@acme.com");
        agent.max_chats = 1;
        let agent = store.upsert_agent(&agent).await.unwrap();

        let a = draft(&assistant, "s-cap-a");
        let b = draft(&assistant, "s-cap-b");
        store.create_handoff(&a).await.unwrap();
        store.create_handoff(&b).await.unwrap();

        // Both requests saw the agent at load 0 before either write landed.
        let now = Utc::now();
        assert!(store.assign_if_pending(a.request.id, agent.id, now).await.unwrap());
        assert!(!store.assign_if_pending(b.request.id, agent.id, now).await.unwrap());

        let stored = store.get_handoff(b.request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HandoffStatus::Pending);
        assert!(stored.assigned_agent_id.is_none());
        assert!(!store.assign_if_pending(a.request.id, Uuid::new_v4(), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_tickets_newest_first_with_total() {
        let (store, assistant) = seeded().await;
        let first = draft(&assistant, "s-4");
        let second = draft(&assistant, "s-4");
        store.create_handoff(&first).await.unwrap();
        store.create_handoff(&second).await.unwrap();

        let filter = TicketFilter {
            limit: 1,
            ..Default::default()
        };
        let (page, total) = store
            .list_tickets(assistant.account_id, &filter)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].request.id, second.request.id);
        assert_eq!(page[0].assistant_name, "Helper");
        assert_eq!(page[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_claim_due_leases_rows() {
        let (store, assistant) = seeded().await;
        let entry = OutboxEntry::new(
            assistant.account_id,
            None,
            NotifyChannel::Slack,
            "https://hooks.slack.com/services/T/B/X",
            serde_json::json!({}),
            5,
        );
        store.enqueue(&[entry]).await.unwrap();

        let now = Utc::now();
        let lease = Duration::from_secs(60);
        assert_eq!(store.claim_due(now, 10, lease).await.unwrap().len(), 1);
        assert!(store.claim_due(now, 10, lease).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_dead_resets_attempts() {
        let (store, assistant) = seeded().await;
        let entry = OutboxEntry::new(
            assistant.account_id,
            None,
            NotifyChannel::Email,
            "support@example.com",
            serde_json::json!({}),
            1,
        );
        let id = entry.id;
        store.enqueue(&[entry]).await.unwrap();
        store
            .record_failure(id, 1, "boom", Utc::now(), true)
            .await
            .unwrap();

        assert_eq!(store.requeue_dead(None, Utc::now()).await.unwrap(), 1);
        let entry = store.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn test_requeue_refuses_leased_and_delivered_rows() {
        let (store, assistant) = seeded().await;
        let entry = OutboxEntry::new(
            assistant.account_id,
            None,
            NotifyChannel::Slack,
            "https://hooks.slack.com/services/T/B/X",
            serde_json::json!({}),
            5,
        );
        let id = entry.id;
        store.enqueue(&[entry]).await.unwrap();

        let now = Utc::now();
        let lease = Duration::from_secs(60);
        assert_eq!(store.claim_due(now, 10, lease).await.unwrap().len(), 1);

        let err = store.requeue(None, id, now).await.unwrap_err();
        assert_eq!(err.error_code(), "E6004");
        assert!(store.claim_due(now, 10, lease).await.unwrap().is_empty());

        store.mark_delivered(id, now).await.unwrap();
        let err = store.requeue(None, id, now).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
        let entry = store.get_entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Delivered);
        assert!(store.claim_due(now, 10, lease).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requeue_failed_row_after_attempt() {
        let (store, assistant) = seeded().await;
        let entry = OutboxEntry::new(
            assistant.account_id,
            None,
            NotifyChannel::Teams,
            "https://example.webhook.office.com/x",
            serde_json::json!({}),
            5,
        );
        let id = entry.id;
        store.enqueue(&[entry]).await.unwrap();

        let now = Utc::now();
        store.claim_due(now, 10, Duration::from_secs(60)).await.unwrap();
        store
            .record_failure(id, 1, "timeout", now + chrono::Duration::minutes(10), false)
            .await
            .unwrap();

        let entry = store.requeue(None, id, now).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.next_attempt_at, now);
        assert!(entry.leased_until.is_none());

        let other_account = Some(Uuid::new_v4());
        assert!(store.requeue(other_account, id, now).await.unwrap_err().is_not_found());
    }
}
