use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "chat_session_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatSessionStatus {
    Active,
    Transferred,
    Resolved,
}

impl std::fmt::Display for ChatSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatSessionStatus::Active => write!(f, "ACTIVE"),
            ChatSessionStatus::Transferred => write!(f, "TRANSFERRED"),
            ChatSessionStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_sender", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSender {
    Customer,
    AiAssistant,
    HumanAgent,
    System,
}

/// Contact details a widget may send along with a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub account_id: Uuid,
    pub assistant_id: Uuid,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_metadata: Option<serde_json::Value>,
    pub status: ChatSessionStatus,
    pub channel: String,
    pub is_handed_off: bool,
    pub assigned_agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, account_id: Uuid, assistant_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            account_id,
            assistant_id,
            customer_name: None,
            customer_email: None,
            customer_phone: None,
            customer_metadata: None,
            status: ChatSessionStatus::Active,
            channel: "web".to_string(),
            is_handed_off: false,
            assigned_agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_customer(mut self, info: &CustomerInfo) -> Self {
        self.customer_name = info.name.clone();
        self.customer_email = info.email.clone();
        self.customer_phone = info.phone.clone();
        self.customer_metadata = info.metadata.clone();
        if let Some(channel) = info.channel.as_deref().filter(|c| !c.is_empty()) {
            self.channel = channel.to_string();
        }
        self
    }

    /// Moves the session to the human queue.
    pub fn transfer(&mut self) {
        self.status = ChatSessionStatus::Transferred;
        self.is_handed_off = true;
        self.updated_at = Utc::now();
    }

    /// Counted against an agent's `max_chats`.
    pub fn counts_toward_load(&self) -> bool {
        matches!(
            self.status,
            ChatSessionStatus::Active | ChatSessionStatus::Transferred
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: String,
    pub assistant_id: Option<Uuid>,
    pub content: String,
    pub message_type: MessageType,
    pub sender: MessageSender,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        session_id: impl Into<String>,
        assistant_id: Option<Uuid>,
        content: impl Into<String>,
        message_type: MessageType,
        sender: MessageSender,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            assistant_id,
            content: content.into(),
            message_type,
            sender,
            is_internal: false,
            created_at: Utc::now(),
        }
    }

    pub fn system(
        session_id: impl Into<String>,
        assistant_id: Uuid,
        sender: MessageSender,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            Some(assistant_id),
            content,
            MessageType::System,
            sender,
        )
    }

    pub fn internal(mut self, is_internal: bool) -> Self {
        self.is_internal = is_internal;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let session = ChatSession::new("sess-1", Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(session.status, ChatSessionStatus::Active);
        assert_eq!(session.channel, "web");
        assert!(!session.is_handed_off);
        assert!(session.counts_toward_load());
    }

    #[test]
    fn test_with_customer_keeps_web_channel_when_blank() {
        let info = CustomerInfo {
            name: Some("Grace".into()),
            channel: Some(String::new()),
            ..Default::default()
        };
        let session = ChatSession::new("s", Uuid::new_v4(), Uuid::new_v4()).with_customer(&info);
        assert_eq!(session.customer_name.as_deref(), Some("Grace"));
        assert_eq!(session.channel, "web");
    }

    #[test]
    fn test_transfer() {
        let mut session = ChatSession::new("s", Uuid::new_v4(), Uuid::new_v4());
        session.transfer();
        assert_eq!(session.status, ChatSessionStatus::Transferred);
        assert!(session.is_handed_off);
        assert!(session.counts_toward_load());

        session.status = ChatSessionStatus::Resolved;
        assert!(!session.counts_toward_load());
    }

    #[test]
    fn test_sender_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageSender::AiAssistant).unwrap(),
            "\"AI_ASSISTANT\""
        );
        assert_eq!(
            serde_json::to_string(&MessageSender::HumanAgent).unwrap(),
            "\"HUMAN_AGENT\""
        );
    }
}
