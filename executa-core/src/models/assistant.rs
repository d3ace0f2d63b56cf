use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ExecutaResult;
use crate::settings::HandoffSettings;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assistant {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub handoff_enabled: bool,
    pub handoff_settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assistant {
    pub fn new(account_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            handoff_enabled: false,
            handoff_settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_handoff(mut self, settings: &HandoffSettings) -> ExecutaResult<Self> {
        self.handoff_enabled = true;
        self.handoff_settings = settings.to_value()?;
        Ok(self)
    }

    /// Parses the stored blob, upgrading legacy documents.
    pub fn settings(&self) -> ExecutaResult<HandoffSettings> {
        HandoffSettings::from_value(&self.handoff_settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_assistant_has_handoff_disabled() {
        let assistant = Assistant::new(Uuid::new_v4(), "Helper");
        assert!(!assistant.handoff_enabled);
        let settings = assistant.settings().unwrap();
        assert_eq!(settings, HandoffSettings::default());
    }

    #[test]
    fn test_with_handoff_stores_versioned_settings() {
        let assistant = Assistant::new(Uuid::new_v4(), "Helper")
            .with_handoff(&HandoffSettings::default())
            .unwrap();
        assert!(assistant.handoff_enabled);
        assert_eq!(assistant.handoff_settings["version"], 1);
    }
}
