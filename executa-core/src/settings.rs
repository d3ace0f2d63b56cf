//! Per-assistant handoff settings.
//!
//! Stored as a versioned JSON document on the assistant row. Documents
//! written before versioning are upgraded on read by filling in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::business_hours::BusinessHours;
use crate::error::{ExecutaError, ExecutaResult};

pub const CURRENT_SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Minimum confidence for auto-detection to fire.
    pub fn confidence_floor(&self) -> f64 {
        match self {
            Sensitivity::Low => 0.9,
            Sensitivity::Medium => 0.7,
            Sensitivity::High => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMethod {
    #[default]
    Email,
    InternalNotification,
    Integration,
}

impl std::fmt::Display for HandoffMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffMethod::Email => write!(f, "email"),
            HandoffMethod::InternalNotification => write!(f, "internal_notification"),
            HandoffMethod::Integration => write!(f, "integration"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    RoundRobin,
    #[default]
    LeastBusy,
    SkillsBased,
}

impl std::fmt::Display for AssignmentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentMethod::RoundRobin => write!(f, "round_robin"),
            AssignmentMethod::LeastBusy => write!(f, "least_busy"),
            AssignmentMethod::SkillsBased => write!(f, "skills_based"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSettings {
    pub support_email: String,
    pub email_template: String,
    pub include_conversation_history: bool,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            support_email: String::new(),
            email_template: "New support request from customer".to_string(),
            include_conversation_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrationSettings {
    pub slack_webhook: String,
    pub teams_webhook: String,
    pub custom_webhook: String,
    pub webhook_headers: HashMap<String, String>,
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

impl IntegrationSettings {
    pub fn slack(&self) -> Option<&str> {
        non_blank(&self.slack_webhook)
    }

    pub fn teams(&self) -> Option<&str> {
        non_blank(&self.teams_webhook)
    }

    pub fn custom(&self) -> Option<&str> {
        non_blank(&self.custom_webhook)
    }

    pub fn has_targets(&self) -> bool {
        self.slack().is_some() || self.teams().is_some() || self.custom().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentSettings {
    pub auto_assign: bool,
    pub assignment_method: AssignmentMethod,
    pub required_skills: Vec<String>,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            auto_assign: true,
            assignment_method: AssignmentMethod::default(),
            required_skills: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffSettings {
    /// Zero marks a document written before versioning.
    #[serde(default)]
    pub version: u32,

    pub trigger_on_keywords: Vec<String>,

    pub trigger_on_auto_detect: bool,
    pub auto_detect_sensitivity: Sensitivity,

    pub trigger_on_sentiment: bool,
    pub sentiment_threshold: f64,

    pub trigger_on_complexity: bool,
    pub max_conversation_length: u32,

    pub trigger_on_failed_attempts: bool,
    pub max_failed_attempts: u32,

    pub trigger_on_escalation: bool,
    pub escalation_keywords: Vec<String>,

    pub trigger_on_repetition: bool,
    pub max_repetitions: u32,

    pub trigger_on_urgency: bool,
    pub urgency_keywords: Vec<String>,

    pub trigger_on_high_effort: bool,
    pub effort_indicators: Vec<String>,

    pub handoff_method: HandoffMethod,
    pub email_settings: EmailSettings,
    pub integration_settings: IntegrationSettings,
    pub assignment: AssignmentSettings,

    pub handoff_message: String,
    pub customer_wait_message: String,
    pub offline_message: String,

    pub business_hours: BusinessHours,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_SETTINGS_VERSION,
            trigger_on_keywords: Vec::new(),
            trigger_on_auto_detect: true,
            auto_detect_sensitivity: Sensitivity::Medium,
            trigger_on_sentiment: false,
            sentiment_threshold: -0.5,
            trigger_on_complexity: false,
            max_conversation_length: 10,
            trigger_on_failed_attempts: true,
            max_failed_attempts: 3,
            trigger_on_escalation: true,
            escalation_keywords: strings(&["manager", "supervisor", "complaint", "refund", "cancel"]),
            trigger_on_repetition: true,
            max_repetitions: 2,
            trigger_on_urgency: true,
            urgency_keywords: strings(&["urgent", "asap", "emergency", "immediately", "critical"]),
            trigger_on_high_effort: true,
            effort_indicators: strings(&[
                "tried everything",
                "nothing works",
                "still not working",
                "multiple times",
            ]),
            handoff_method: HandoffMethod::Email,
            email_settings: EmailSettings::default(),
            integration_settings: IntegrationSettings::default(),
            assignment: AssignmentSettings::default(),
            handoff_message: "I'm connecting you with our support team who can better assist you."
                .to_string(),
            customer_wait_message: "Please wait while we connect you with our support team."
                .to_string(),
            offline_message:
                "Our support team will review your message and get back to you soon.".to_string(),
            business_hours: BusinessHours::default(),
        }
    }
}

impl HandoffSettings {
    /// Parses a stored document. `null` and `{}` yield the defaults.
    pub fn from_value(value: &serde_json::Value) -> ExecutaResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }

        let mut settings: HandoffSettings = serde_json::from_value(value.clone()).map_err(|e| {
            ExecutaError::InvalidHandoffSettings(format!("Malformed handoff settings: {}", e))
        })?;

        if settings.version > CURRENT_SETTINGS_VERSION {
            return Err(ExecutaError::UnsupportedSettingsVersion(settings.version));
        }
        if settings.version == 0 {
            settings.version = CURRENT_SETTINGS_VERSION;
        }

        Ok(settings)
    }

    /// Serializes at the current schema version.
    pub fn to_value(&self) -> ExecutaResult<serde_json::Value> {
        let mut stamped = self.clone();
        stamped.version = CURRENT_SETTINGS_VERSION;
        Ok(serde_json::to_value(&stamped)?)
    }

    pub fn validate(&self) -> ExecutaResult<()> {
        if self.handoff_method == HandoffMethod::Email
            && non_blank(&self.email_settings.support_email).is_none()
        {
            return Err(ExecutaError::InvalidHandoffSettings(
                "Support email is required when using email handoff method".to_string(),
            ));
        }

        if self.handoff_method == HandoffMethod::Email
            && !self.email_settings.support_email.contains('@')
        {
            return Err(ExecutaError::InvalidHandoffSettings(format!(
                "Invalid support email '{}'",
                self.email_settings.support_email
            )));
        }

        if !(-1.0..=1.0).contains(&self.sentiment_threshold) {
            return Err(ExecutaError::InvalidHandoffSettings(
                "Sentiment threshold must be between -1 and 1".to_string(),
            ));
        }

        let webhooks = [
            ("slackWebhook", self.integration_settings.slack()),
            ("teamsWebhook", self.integration_settings.teams()),
            ("customWebhook", self.integration_settings.custom()),
        ];
        for (name, url) in webhooks {
            if let Some(url) = url {
                if !url.starts_with("https://") && !url.starts_with("http://") {
                    return Err(ExecutaError::InvalidHandoffSettings(format!(
                        "Invalid URL for {}",
                        name
                    )));
                }
            }
        }

        if self.business_hours.enabled {
            self.business_hours.validate()?;
        }

        Ok(())
    }

    pub fn summary(&self) -> SettingsSummary {
        SettingsSummary {
            keywords: self.trigger_on_keywords.clone(),
            auto_detect: self.trigger_on_auto_detect,
            sensitivity: self.auto_detect_sensitivity,
            sentiment_analysis: self.trigger_on_sentiment,
            sentiment_threshold: self.sentiment_threshold,
            handoff_method: self.handoff_method,
            business_hours_enabled: self.business_hours.enabled,
        }
    }
}

/// Compact view returned alongside trigger evaluations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSummary {
    pub keywords: Vec<String>,
    pub auto_detect: bool,
    pub sensitivity: Sensitivity,
    pub sentiment_analysis: bool,
    pub sentiment_threshold: f64,
    pub handoff_method: HandoffMethod,
    pub business_hours_enabled: bool,
}
