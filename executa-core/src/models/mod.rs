mod account;
mod agent;
mod assistant;
mod handoff;
mod outbox;
mod session;

pub use account::{Account, User, UserRole};
pub use agent::HumanAgent;
pub use assistant::Assistant;
pub use handoff::{HandoffReason, HandoffRequest, HandoffStatus, Priority};
pub use outbox::{NotifyChannel, OutboxEntry, OutboxStatus};
pub use session::{
    ChatMessage, ChatSession, ChatSessionStatus, CustomerInfo, MessageSender, MessageType,
};
