#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::derivable_impls,
    clippy::type_complexity,
    clippy::too_many_arguments,
    dead_code
)]

pub mod assignment;
pub mod business_hours;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod outbox;
pub mod repo;
pub mod services;
pub mod settings;
pub mod triggers;
pub mod zendesk;

pub use assignment::AgentLoad;
pub use business_hours::{is_open_at, BusinessHours, DaySchedule, WeeklySchedule};
pub use config::{
    get_config_dir, ConfigLoadError, DatabaseConfig, EmailConfig, ExecutaConfig, HandoffConfig,
    LoggingConfig, NotificationsConfig, ServerConfig, StorageBackend, ZendeskConfig,
};
pub use db::{redact_url, Database, DatabaseError, PoolSettings};
pub use error::{retry_async_with_config, ErrorKind, ExecutaError, ExecutaResult, RetryConfig};
pub use events::{TicketEvent, TicketEventKind, TicketEvents};
pub use models::{
    Account, Assistant, ChatMessage, ChatSession, ChatSessionStatus, CustomerInfo,
    HandoffReason, HandoffRequest, HandoffStatus, HumanAgent, MessageSender, MessageType,
    NotifyChannel, OutboxEntry, OutboxStatus, Priority, User, UserRole,
};
pub use notify::{Deliver, Notifier, OutboundMessage};
pub use outbox::{DeliveryOutcome, DrainReport, OutboxProcessor, OutboxWorker};
pub use repo::{MemoryStore, OutboxFilter, Repositories, TicketFilter};
pub use services::Services;
pub use settings::{AssignmentMethod, HandoffMethod, HandoffSettings};
pub use triggers::{ConversationContext, TriggerEvaluation};
pub use zendesk::{ZendeskClient, ZendeskService};

/// Connects to PostgreSQL and applies pending migrations.
pub async fn init_database(config: &ExecutaConfig) -> Result<Database, DatabaseError> {
    let db = Database::connect(&PoolSettings::from(&config.database)).await?;
    db.run_migrations().await?;
    Ok(db)
}
