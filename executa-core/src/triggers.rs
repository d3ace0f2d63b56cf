//! Handoff trigger evaluation.
//!
//! A pure function of the customer's message, the assistant's settings and a
//! little conversation context. Nothing is learned or persisted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::models::{HandoffReason, Priority};
use crate::settings::HandoffSettings;

const INTENT_PATTERNS: [&str; 5] = [
    r"(?i)\b(human|person|agent|representative|operator)\b",
    r"(?i)\b(talk to|speak with|connect me|transfer me)\b",
    r"(?i)\b(frustrated|help me|assistance|support)\b",
    r"(?i)\b(manager|supervisor|escalate)\b",
    r"(?i)\b(urgent|important|asap|emergency)\b",
];

const NEGATIVE_WORDS: [&str; 9] = [
    "frustrated",
    "angry",
    "upset",
    "annoyed",
    "terrible",
    "awful",
    "horrible",
    "hate",
    "worst",
];

fn intent_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INTENT_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("valid intent pattern"))
            .collect()
    })
}

/// What the assistant knows about the conversation so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationContext {
    pub message_count: u32,
    pub failed_attempts: u32,
    pub previous_customer_messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvaluation {
    pub keyword_matches: Vec<String>,
    pub keyword_triggered: bool,
    pub auto_detect_enabled: bool,
    pub auto_detect_triggered: bool,
    pub ai_confidence: f64,
    pub sentiment_score: f64,
    pub sentiment_triggered: bool,
    pub escalation_matches: Vec<String>,
    pub urgency_matches: Vec<String>,
    pub effort_matches: Vec<String>,
    pub length_triggered: bool,
    pub failed_attempts_triggered: bool,
    pub repetition_triggered: bool,
    pub would_trigger_handoff: bool,
    pub trigger_reasons: Vec<String>,
    pub suggested_reason: HandoffReason,
    pub suggested_priority: Priority,
}

fn substring_matches(haystack: &str, needles: &[String]) -> Vec<String> {
    needles
        .iter()
        .filter(|n| !n.trim().is_empty() && haystack.contains(&n.to_lowercase()))
        .cloned()
        .collect()
}

fn normalize(message: &str) -> String {
    message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score in `[-1.0, 0.0]`, dropping by half a point per negative word.
pub fn sentiment_score(message: &str) -> f64 {
    let lower = message.to_lowercase();
    let hits = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    (-0.5 * hits as f64).max(-1.0)
}

pub fn evaluate(
    message: &str,
    settings: &HandoffSettings,
    context: &ConversationContext,
) -> TriggerEvaluation {
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    let keyword_matches: Vec<String> = settings
        .trigger_on_keywords
        .iter()
        .filter(|keyword| {
            let keyword = keyword.to_lowercase();
            !keyword.is_empty() && words.iter().any(|w| w.contains(&keyword))
        })
        .cloned()
        .collect();
    let keyword_triggered = !keyword_matches.is_empty();

    let pattern_matched = intent_patterns().iter().any(|re| re.is_match(message));
    let ai_confidence = match (pattern_matched, keyword_triggered) {
        (true, true) => 0.9,
        (true, false) => 0.7,
        _ => 0.3,
    };
    let auto_detect_triggered = settings.trigger_on_auto_detect
        && pattern_matched
        && ai_confidence >= settings.auto_detect_sensitivity.confidence_floor();

    let score = sentiment_score(message);
    let sentiment_triggered =
        settings.trigger_on_sentiment && score < 0.0 && score <= settings.sentiment_threshold;

    let escalation_matches = if settings.trigger_on_escalation {
        substring_matches(&lower, &settings.escalation_keywords)
    } else {
        Vec::new()
    };
    let urgency_matches = if settings.trigger_on_urgency {
        substring_matches(&lower, &settings.urgency_keywords)
    } else {
        Vec::new()
    };
    let effort_matches = if settings.trigger_on_high_effort {
        substring_matches(&lower, &settings.effort_indicators)
    } else {
        Vec::new()
    };

    let length_triggered = settings.trigger_on_complexity
        && context.message_count >= settings.max_conversation_length;
    let failed_attempts_triggered = settings.trigger_on_failed_attempts
        && context.failed_attempts >= settings.max_failed_attempts;

    let current = normalize(message);
    let repetitions = context
        .previous_customer_messages
        .iter()
        .filter(|m| !current.is_empty() && normalize(m) == current)
        .count() as u32;
    let repetition_triggered = settings.trigger_on_repetition
        && settings.max_repetitions > 0
        && repetitions >= settings.max_repetitions;

    let mut trigger_reasons = Vec::new();
    if keyword_triggered {
        trigger_reasons.push(format!("Keywords: {}", keyword_matches.join(", ")));
    }
    if auto_detect_triggered {
        trigger_reasons.push(format!(
            "AI Detection ({}% confidence)",
            (ai_confidence * 100.0).round() as u32
        ));
    }
    if sentiment_triggered {
        trigger_reasons.push("Negative sentiment detected".to_string());
    }
    if !escalation_matches.is_empty() {
        trigger_reasons.push(format!(
            "Escalation keywords: {}",
            escalation_matches.join(", ")
        ));
    }
    if !urgency_matches.is_empty() {
        trigger_reasons.push(format!("Urgency keywords: {}", urgency_matches.join(", ")));
    }
    if !effort_matches.is_empty() {
        trigger_reasons.push(format!(
            "Customer effort indicators: {}",
            effort_matches.join(", ")
        ));
    }
    if length_triggered {
        trigger_reasons.push(format!(
            "Conversation length exceeded ({} messages)",
            context.message_count
        ));
    }
    if failed_attempts_triggered {
        trigger_reasons.push(format!(
            "Failed attempts exceeded ({})",
            context.failed_attempts
        ));
    }
    if repetition_triggered {
        trigger_reasons.push(format!("Repeated question ({} times)", repetitions));
    }

    let would_trigger_handoff = !trigger_reasons.is_empty();

    let suggested_priority = if !urgency_matches.is_empty() {
        Priority::Urgent
    } else if !escalation_matches.is_empty() || sentiment_triggered {
        Priority::High
    } else {
        Priority::Normal
    };

    let suggested_reason = if !urgency_matches.is_empty() {
        HandoffReason::UrgentIssue
    } else if !escalation_matches.is_empty() {
        HandoffReason::Escalation
    } else if sentiment_triggered {
        HandoffReason::NegativeSentiment
    } else if keyword_triggered {
        HandoffReason::KeywordTrigger
    } else if auto_detect_triggered {
        HandoffReason::AutoDetected
    } else if failed_attempts_triggered {
        HandoffReason::FailedAttempts
    } else if length_triggered {
        HandoffReason::ComplexQuery
    } else {
        HandoffReason::CustomerRequest
    };

    TriggerEvaluation {
        keyword_matches,
        keyword_triggered,
        auto_detect_enabled: settings.trigger_on_auto_detect,
        auto_detect_triggered,
        ai_confidence,
        sentiment_score: score,
        sentiment_triggered,
        escalation_matches,
        urgency_matches,
        effort_matches,
        length_triggered,
        failed_attempts_triggered,
        repetition_triggered,
        would_trigger_handoff,
        trigger_reasons,
        suggested_reason,
        suggested_priority,
    }
}
