use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "handoff_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffStatus {
    Pending,
    Assigned,
    Accepted,
    InProgress,
    Resolved,
    Expired,
}

impl HandoffStatus {
    pub const ALL: [HandoffStatus; 6] = [
        HandoffStatus::Pending,
        HandoffStatus::Assigned,
        HandoffStatus::Accepted,
        HandoffStatus::InProgress,
        HandoffStatus::Resolved,
        HandoffStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffStatus::Pending => "PENDING",
            HandoffStatus::Assigned => "ASSIGNED",
            HandoffStatus::Accepted => "ACCEPTED",
            HandoffStatus::InProgress => "IN_PROGRESS",
            HandoffStatus::Resolved => "RESOLVED",
            HandoffStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandoffStatus::Resolved | HandoffStatus::Expired)
    }

    /// Statuses that count toward an agent's open tickets.
    pub fn is_open_for_agent(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Assigned | HandoffStatus::Accepted | HandoffStatus::InProgress
        )
    }
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        HandoffStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("Unknown status: {}", s))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "handoff_priority", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| format!("Unknown priority: {}", s))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "handoff_reason", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffReason {
    #[default]
    CustomerRequest,
    KeywordTrigger,
    AutoDetected,
    NegativeSentiment,
    ComplexQuery,
    FailedAttempts,
    Escalation,
    UrgentIssue,
    Other,
}

impl HandoffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffReason::CustomerRequest => "CUSTOMER_REQUEST",
            HandoffReason::KeywordTrigger => "KEYWORD_TRIGGER",
            HandoffReason::AutoDetected => "AUTO_DETECTED",
            HandoffReason::NegativeSentiment => "NEGATIVE_SENTIMENT",
            HandoffReason::ComplexQuery => "COMPLEX_QUERY",
            HandoffReason::FailedAttempts => "FAILED_ATTEMPTS",
            HandoffReason::Escalation => "ESCALATION",
            HandoffReason::UrgentIssue => "URGENT_ISSUE",
            HandoffReason::Other => "OTHER",
        }
    }

    /// `CUSTOMER_REQUEST` becomes `CUSTOMER REQUEST`: only the first
    /// underscore is replaced.
    pub fn subject_label(&self) -> String {
        self.as_str().replacen('_', " ", 1)
    }
}

impl std::fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer's escalation to a human. Shown to operators as a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub session_id: String,
    pub assistant_id: Uuid,
    pub reason: HandoffReason,
    pub priority: Priority,
    pub context: Option<String>,
    pub customer_query: Option<String>,
    pub settings_snapshot: serde_json::Value,
    pub status: HandoffStatus,
    pub assigned_agent_id: Option<Uuid>,
    pub zendesk_ticket_id: Option<i64>,
    pub zendesk_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(
        account_id: Uuid,
        session_id: impl Into<String>,
        assistant_id: Uuid,
        reason: HandoffReason,
        priority: Priority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            session_id: session_id.into(),
            assistant_id,
            reason,
            priority,
            context: None,
            customer_query: None,
            settings_snapshot: serde_json::json!({}),
            status: HandoffStatus::Pending,
            assigned_agent_id: None,
            zendesk_ticket_id: None,
            zendesk_url: None,
            created_at: now,
            assigned_at: None,
            accepted_at: None,
            resolved_at: None,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: Option<String>, customer_query: Option<String>) -> Self {
        self.context = context;
        self.customer_query = customer_query;
        self
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.settings_snapshot = snapshot;
        self
    }

    pub fn is_assignable(&self) -> bool {
        self.status == HandoffStatus::Pending && self.assigned_agent_id.is_none()
    }
}
