use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A human support agent. One profile per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HumanAgent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_online: bool,
    pub is_available: bool,
    pub max_chats: i32,
    pub departments: Vec<String>,
    pub skills: Vec<String>,
    pub last_active: Option<DateTime<Utc>>,
    pub last_assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl HumanAgent {
    pub fn new(
        account_id: Uuid,
        user_id: Uuid,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            user_id,
            name: name.into(),
            email: email.into(),
            is_online: false,
            is_available: true,
            max_chats: 5,
            departments: vec!["General".to_string()],
            skills: Vec::new(),
            last_active: None,
            last_assigned_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn can_take_chats(&self) -> bool {
        self.is_online && self.is_available
    }

    pub fn department(&self) -> &str {
        self.departments
            .first()
            .map(String::as_str)
            .unwrap_or("General")
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(skill))
    }
}
