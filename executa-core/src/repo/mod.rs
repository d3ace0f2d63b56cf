//! Persistence seams.
//!
//! Each aggregate gets a store trait. PostgreSQL repositories back them in
//! production and [`MemoryStore`] backs them in development and tests.

pub mod agent_repo;
pub mod assistant_repo;
pub mod handoff_repo;
pub mod memory;
pub mod outbox_repo;
pub mod session_repo;
pub mod user_repo;

pub use agent_repo::PgAgentRepository;
pub use assistant_repo::PgAssistantRepository;
pub use handoff_repo::PgHandoffRepository;
pub use memory::MemoryStore;
pub use outbox_repo::PgOutboxRepository;
pub use session_repo::PgSessionRepository;
pub use user_repo::PgUserRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::assignment::AgentLoad;
use crate::db::Database;
use crate::error::ExecutaResult;
use crate::models::{
    Account, Assistant, ChatMessage, ChatSession, ChatSessionStatus, HandoffRequest,
    HandoffStatus, HumanAgent, OutboxEntry, OutboxStatus, Priority, User,
};

/// Filters for the ticket inbox. `None` means "any".
#[derive(Debug, Clone)]
pub struct TicketFilter {
    pub status: Option<HandoffStatus>,
    pub priority: Option<Priority>,
    pub assigned_agent_id: Option<Uuid>,
    pub page: u32,
    pub limit: u32,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            assigned_agent_id: None,
            page: 1,
            limit: 10,
        }
    }
}

impl TicketFilter {
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1) * self.limit
    }
}

/// A ticket joined with the data the inbox shows next to it.
#[derive(Debug, Clone, FromRow)]
pub struct TicketSummary {
    #[sqlx(flatten)]
    pub request: HandoffRequest,
    pub assistant_name: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub channel: String,
    pub agent_name: Option<String>,
    pub agent_email: Option<String>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Everything written when a conversation is escalated.
#[derive(Debug, Clone)]
pub struct HandoffDraft {
    /// Inserted only if no session with this id exists yet.
    pub session: ChatSession,
    pub request: HandoffRequest,
    pub notice: ChatMessage,
    pub outbox: Vec<OutboxEntry>,
}

/// A ticket state change with its conversation side effects.
#[derive(Debug, Clone)]
pub struct TicketUpdate {
    pub request: HandoffRequest,
    pub session_status: Option<ChatSessionStatus>,
    pub notice: Option<ChatMessage>,
}

#[derive(Debug, Clone, Default)]
pub struct OutboxFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<OutboxStatus>,
    pub limit: u32,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_account(&self, account: &Account) -> ExecutaResult<Account>;
    async fn insert_user(&self, user: &User) -> ExecutaResult<User>;
    async fn get_user(&self, id: Uuid) -> ExecutaResult<Option<User>>;
    async fn find_by_api_key(&self, api_key: &str) -> ExecutaResult<Option<User>>;
    async fn find_owner(&self, account_id: Uuid) -> ExecutaResult<Option<User>>;
}

#[async_trait]
pub trait AssistantStore: Send + Sync {
    async fn insert_assistant(&self, assistant: &Assistant) -> ExecutaResult<Assistant>;
    async fn get_assistant(&self, id: Uuid) -> ExecutaResult<Option<Assistant>>;
    async fn update_handoff_settings(
        &self,
        id: Uuid,
        enabled: bool,
        settings: &serde_json::Value,
    ) -> ExecutaResult<Option<Assistant>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &ChatSession) -> ExecutaResult<ChatSession>;
    async fn get_session(&self, id: &str) -> ExecutaResult<Option<ChatSession>>;
    async fn append_message(&self, message: &ChatMessage) -> ExecutaResult<ChatMessage>;
    /// Oldest first.
    async fn list_messages(&self, session_id: &str) -> ExecutaResult<Vec<ChatMessage>>;
}

#[async_trait]
pub trait HandoffStore: Send + Sync {
    /// Writes the whole draft atomically and returns the transferred session.
    async fn create_handoff(&self, draft: &HandoffDraft) -> ExecutaResult<ChatSession>;
    async fn get_handoff(&self, id: Uuid) -> ExecutaResult<Option<HandoffRequest>>;
    async fn latest_for_session(
        &self,
        assistant_id: Uuid,
        session_id: &str,
    ) -> ExecutaResult<Option<HandoffRequest>>;
    async fn list_tickets(
        &self,
        account_id: Uuid,
        filter: &TicketFilter,
    ) -> ExecutaResult<(Vec<TicketSummary>, i64)>;
    async fn apply_ticket_update(&self, update: &TicketUpdate) -> ExecutaResult<HandoffRequest>;
    /// Assigns only while the request is still PENDING and unassigned and
    /// the agent is below `max_chats`. Returns false when another writer got
    /// there first or the agent filled up in the meantime.
    async fn assign_if_pending(
        &self,
        request_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> ExecutaResult<bool>;
    async fn find_by_zendesk_id(
        &self,
        account_id: Uuid,
        zendesk_ticket_id: i64,
    ) -> ExecutaResult<Option<HandoffRequest>>;
    async fn set_zendesk_link(
        &self,
        id: Uuid,
        zendesk_ticket_id: i64,
        zendesk_url: &str,
    ) -> ExecutaResult<()>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Creation order.
    async fn list_agents(&self, account_id: Uuid) -> ExecutaResult<Vec<HumanAgent>>;
    async fn get_agent(&self, id: Uuid) -> ExecutaResult<Option<HumanAgent>>;
    async fn find_agent_by_user(&self, user_id: Uuid) -> ExecutaResult<Option<HumanAgent>>;
    /// Inserts or updates the profile keyed by `user_id`. Online state and
    /// capacity of an existing profile are left alone.
    async fn upsert_agent(&self, agent: &HumanAgent) -> ExecutaResult<HumanAgent>;
    /// Online, available agents with their ACTIVE and TRANSFERRED session counts.
    async fn agent_loads(&self, account_id: Uuid) -> ExecutaResult<Vec<AgentLoad>>;
    /// Per agent, the number of ASSIGNED, ACCEPTED and IN_PROGRESS requests.
    async fn active_ticket_counts(&self, account_id: Uuid) -> ExecutaResult<HashMap<Uuid, i64>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, entries: &[OutboxEntry]) -> ExecutaResult<()>;
    async fn get_entry(&self, id: Uuid) -> ExecutaResult<Option<OutboxEntry>>;
    /// Leases up to `limit` due rows by pushing their `next_attempt_at`
    /// forward, so concurrent workers skip them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>>;
    /// Like `claim_due`, restricted to the given rows.
    async fn claim_ids(
        &self,
        ids: &[Uuid],
        now: DateTime<Utc>,
        lease: Duration,
    ) -> ExecutaResult<Vec<OutboxEntry>>;
    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> ExecutaResult<()>;
    async fn record_failure(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        dead: bool,
    ) -> ExecutaResult<()>;
    /// Newest first.
    async fn list_outbox(&self, filter: &OutboxFilter) -> ExecutaResult<Vec<OutboxEntry>>;
    /// Resets a row to pending with a fresh attempt budget. Delivered rows
    /// and rows under a live lease fail with `OutboxEntryBusy`.
    async fn requeue(
        &self,
        account_id: Option<Uuid>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> ExecutaResult<OutboxEntry>;
    async fn requeue_dead(&self, account_id: Option<Uuid>, now: DateTime<Utc>)
        -> ExecutaResult<u64>;
}

/// The set of stores handed to services.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserStore>,
    pub assistants: Arc<dyn AssistantStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub handoffs: Arc<dyn HandoffStore>,
    pub agents: Arc<dyn AgentStore>,
    pub outbox: Arc<dyn OutboxStore>,
    database: Option<Database>,
}

impl Repositories {
    pub fn postgres(database: Database) -> Self {
        let pool = database.pool().clone();
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            assistants: Arc::new(PgAssistantRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            handoffs: Arc::new(PgHandoffRepository::new(pool.clone())),
            agents: Arc::new(PgAgentRepository::new(pool.clone())),
            outbox: Arc::new(PgOutboxRepository::new(pool)),
            database: Some(database),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            assistants: store.clone(),
            sessions: store.clone(),
            handoffs: store.clone(),
            agents: store.clone(),
            outbox: store,
            database: None,
        }
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub async fn health_check(&self) -> ExecutaResult<()> {
        if let Some(db) = &self.database {
            db.health_check().await?;
        }
        Ok(())
    }
}
