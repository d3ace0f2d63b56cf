use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notify_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    Email,
    Slack,
    Teams,
    Webhook,
}

impl std::fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyChannel::Email => write!(f, "email"),
            NotifyChannel::Slack => write!(f, "slack"),
            NotifyChannel::Teams => write!(f, "teams"),
            NotifyChannel::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
    Dead,
}

impl OutboxStatus {
    /// Rows the worker still has to deliver.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, OutboxStatus::Pending | OutboxStatus::Failed)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Delivered => write!(f, "delivered"),
            OutboxStatus::Failed => write!(f, "failed"),
            OutboxStatus::Dead => write!(f, "dead"),
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OutboxStatus::Pending),
            "delivered" => Ok(OutboxStatus::Delivered),
            "failed" => Ok(OutboxStatus::Failed),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(format!("Unknown outbox status: {}", other)),
        }
    }
}

/// A queued notification. `payload` holds the fully rendered message.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub handoff_request_id: Option<Uuid>,
    pub channel: NotifyChannel,
    pub target: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    /// Set while a worker holds the row, cleared once the attempt is recorded.
    pub leased_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(
        account_id: Uuid,
        handoff_request_id: Option<Uuid>,
        channel: NotifyChannel,
        target: impl Into<String>,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            handoff_request_id,
            channel,
            target: target.into(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts as i32,
            last_error: None,
            next_attempt_at: now,
            leased_until: None,
            created_at: now,
            delivered_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_deliverable() && self.next_attempt_at <= now
    }

    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.leased_until.is_some_and(|until| until > now)
    }

    /// Delivered rows and rows a worker is sending cannot be reset.
    pub fn can_requeue(&self, now: DateTime<Utc>) -> bool {
        self.status != OutboxStatus::Delivered && !self.is_leased(now)
    }
}
