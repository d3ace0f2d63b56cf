//! Coded errors for the handoff core.
//!
//! Every failure the library surfaces is an [`ExecutaError`]. The `[Exxxx]`
//! prefix is stable, so the same code shows up in logs and in API bodies.
//!
//! | Range | Area |
//! |-------|------|
//! | E1xxx | PostgreSQL pool, queries, migrations, transactions |
//! | E2xxx | Configuration files and environment |
//! | E3xxx | Assistants and handoff settings |
//! | E4xxx | Chat sessions and tickets |
//! | E5xxx | Zendesk, SendGrid and other outbound HTTP |
//! | E6xxx | Notification delivery and the outbox |
//! | E7xxx | Human agents |
//! | E9xxx | Auth, validation, IO and everything else |

use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Used while the server waits for PostgreSQL at startup.
    pub fn for_database() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Schedule for outbox rows. The worker stores `next_attempt_at`
    /// instead of sleeping, so delays run from seconds to an hour.
    pub fn for_notifications(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt`, counting from zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let millis = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent))
        .min(self.max_delay.as_millis() as f64);

        let millis = if self.jitter {
            millis * (1.0 + jitter_fraction() * 0.25)
        } else {
            millis
        };
        Duration::from_millis(millis as u64)
    }
}

fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Coarse classification the HTTP layer turns into a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum ExecutaError {
    // Database
    #[error("[E1001] Database connection failed: {0}")]
    DatabaseConnectionFailed(String),

    #[error("[E1002] Database query failed: {0}")]
    DatabaseQueryFailed(String),

    #[error("[E1003] Database migration failed: {0}")]
    DatabaseMigrationFailed(String),

    #[error("[E1004] Database pool unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("[E1005] Database transaction failed: {0}")]
    DatabaseTransactionFailed(String),

    // Configuration
    #[error("[E2003] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    #[error("[E2004] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // Assistants and settings
    #[error("[E3001] Assistant not found")]
    AssistantNotFound(String),

    #[error("[E3002] {0}")]
    InvalidHandoffSettings(String),

    #[error("[E3003] Handoff not enabled for this assistant")]
    HandoffNotEnabled(String),

    #[error("[E3004] Unsupported handoff settings version {0}")]
    UnsupportedSettingsVersion(u32),

    // Sessions and tickets
    #[error("[E4001] Session not found")]
    SessionNotFound(String),

    #[error("[E4002] Ticket not found")]
    TicketNotFound(String),

    #[error("[E4003] Handoff request not found")]
    HandoffRequestNotFound(String),

    #[error("[E4004] Invalid action")]
    InvalidTicketAction(String),

    #[error("[E4005] Ticket not linked to Zendesk")]
    TicketNotLinked(String),

    #[error("[E4006] Corresponding Executa ticket not found")]
    LinkedTicketNotFound(i64),

    // Outbound HTTP
    #[error("[E5001] API request failed: {0}")]
    ApiRequestFailed(String),

    #[error("[E5002] Unexpected API response: {0}")]
    ApiParseError(String),

    #[error("[E5003] {service} is rate limiting requests")]
    RateLimited { service: String },

    #[error("[E5005] API service unavailable: {0}")]
    ApiUnavailable(String),

    #[error("[E5006] API request timed out")]
    ApiTimeout,

    #[error("[E5007] Zendesk not configured")]
    ZendeskNotConfigured,

    #[error("[E5008] Zendesk API error {status}: {body}")]
    ZendeskApi { status: u16, body: String },

    // Notifications
    #[error("[E6001] {channel} notification failed: {message}")]
    NotificationFailed { channel: String, message: String },

    #[error("[E6002] Outbox entry not found: {0}")]
    OutboxEntryNotFound(String),

    #[error("[E6003] Invalid email address '{0}'")]
    InvalidRecipient(String),

    #[error("[E6004] Notification is delivered or being delivered: {0}")]
    OutboxEntryBusy(String),

    // Agents
    #[error("[E7001] Agent not found: {0}")]
    AgentNotFound(String),

    // General
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    #[error("[E9003] Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("[E9004] {0}")]
    ValidationError(String),

    #[error("[E9005] IO error: {0}")]
    IoError(String),

    #[error("[E9006] Serialization error: {0}")]
    SerializationError(String),

    #[error("[E9007] Unauthorized")]
    Unauthorized,

    #[error("[E9008] {0}")]
    Forbidden(String),

    #[error("[E9009] Invalid signature")]
    InvalidSignature,
}

pub type ExecutaResult<T> = Result<T, ExecutaError>;

impl ExecutaError {
    pub fn validation(message: impl Into<String>) -> Self {
        ExecutaError::ValidationError(message.into())
    }

    pub fn notification(channel: impl fmt::Display, message: impl Into<String>) -> Self {
        ExecutaError::NotificationFailed {
            channel: channel.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use ExecutaError::*;
        match self {
            AssistantNotFound(_)
            | SessionNotFound(_)
            | TicketNotFound(_)
            | HandoffRequestNotFound(_)
            | LinkedTicketNotFound(_)
            | OutboxEntryNotFound(_)
            | AgentNotFound(_) => ErrorKind::NotFound,
            InvalidHandoffSettings(_)
            | HandoffNotEnabled(_)
            | UnsupportedSettingsVersion(_)
            | InvalidTicketAction(_)
            | TicketNotLinked(_)
            | ZendeskNotConfigured
            | InvalidRecipient(_)
            | ValidationError(_) => ErrorKind::BadRequest,
            Unauthorized | InvalidSignature => ErrorKind::Unauthorized,
            Forbidden(_) => ErrorKind::Forbidden,
            AlreadyExists(_) | OutboxEntryBusy(_) => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ExecutaError::DatabaseUnavailable(_)
            | ExecutaError::DatabaseConnectionFailed(_)
            | ExecutaError::RateLimited { .. }
            | ExecutaError::ApiUnavailable(_)
            | ExecutaError::ApiTimeout
            | ExecutaError::NotificationFailed { .. } => true,
            ExecutaError::ZendeskApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The message without its `[Exxxx]` prefix, safe to return to API callers.
    pub fn public_message(&self) -> String {
        let full = self.to_string();
        match full.split_once("] ") {
            Some((code, rest)) if code.starts_with("[E") => rest.to_string(),
            _ => full,
        }
    }

    pub fn error_code(&self) -> &'static str {
        use ExecutaError::*;
        match self {
            DatabaseConnectionFailed(_) => "E1001",
            DatabaseQueryFailed(_) => "E1002",
            DatabaseMigrationFailed(_) => "E1003",
            DatabaseUnavailable(_) => "E1004",
            DatabaseTransactionFailed(_) => "E1005",
            ConfigParseError(_) => "E2003",
            InvalidConfigValue { .. } => "E2004",
            AssistantNotFound(_) => "E3001",
            InvalidHandoffSettings(_) => "E3002",
            HandoffNotEnabled(_) => "E3003",
            UnsupportedSettingsVersion(_) => "E3004",
            SessionNotFound(_) => "E4001",
            TicketNotFound(_) => "E4002",
            HandoffRequestNotFound(_) => "E4003",
            InvalidTicketAction(_) => "E4004",
            TicketNotLinked(_) => "E4005",
            LinkedTicketNotFound(_) => "E4006",
            ApiRequestFailed(_) => "E5001",
            ApiParseError(_) => "E5002",
            RateLimited { .. } => "E5003",
            ApiUnavailable(_) => "E5005",
            ApiTimeout => "E5006",
            ZendeskNotConfigured => "E5007",
            ZendeskApi { .. } => "E5008",
            NotificationFailed { .. } => "E6001",
            OutboxEntryNotFound(_) => "E6002",
            InvalidRecipient(_) => "E6003",
            OutboxEntryBusy(_) => "E6004",
            AgentNotFound(_) => "E7001",
            Internal(_) => "E9001",
            AlreadyExists(_) => "E9003",
            ValidationError(_) => "E9004",
            IoError(_) => "E9005",
            SerializationError(_) => "E9006",
            Unauthorized => "E9007",
            Forbidden(_) => "E9008",
            InvalidSignature => "E9009",
        }
    }

    /// Client and transient failures log at warn, the rest at error.
    pub fn log(&self) {
        let code = self.error_code();
        if self.is_transient() || self.is_client_error() {
            warn!(error_code = %code, "{}", self);
        } else {
            error!(error_code = %code, "{}", self);
        }
    }
}

impl From<sqlx::Error> for ExecutaError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ExecutaError::DatabaseUnavailable(err.to_string())
            }
            sqlx::Error::Configuration(_) | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                ExecutaError::DatabaseConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    ExecutaError::AlreadyExists(db_err.message().to_string())
                } else {
                    ExecutaError::DatabaseQueryFailed(db_err.to_string())
                }
            }
            other => ExecutaError::DatabaseQueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ExecutaError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ExecutaError::DatabaseMigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for ExecutaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ExecutaError::ApiTimeout;
        }
        if err.is_connect() {
            return ExecutaError::ApiUnavailable(err.to_string());
        }
        match err.status().map(|s| s.as_u16()) {
            Some(429) => ExecutaError::RateLimited {
                service: err
                    .url()
                    .and_then(|u| u.host_str())
                    .unwrap_or("upstream")
                    .to_string(),
            },
            Some(500..=599) => ExecutaError::ApiUnavailable(err.to_string()),
            _ if err.is_decode() => ExecutaError::ApiParseError(err.to_string()),
            _ => ExecutaError::ApiRequestFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ExecutaError {
    fn from(err: serde_json::Error) -> Self {
        ExecutaError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ExecutaError {
    fn from(err: std::io::Error) -> Self {
        ExecutaError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for ExecutaError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ExecutaError::InvalidConfigValue {
                key,
                message: "missing".to_string(),
            },
            config::ConfigError::Type {
                key,
                unexpected,
                expected,
                ..
            } => ExecutaError::InvalidConfigValue {
                key: key.unwrap_or_default(),
                message: format!("expected {}, found {}", expected, unexpected),
            },
            other => ExecutaError::ConfigParseError(other.to_string()),
        }
    }
}

impl From<crate::db::DatabaseError> for ExecutaError {
    fn from(err: crate::db::DatabaseError) -> Self {
        use crate::db::DatabaseError;
        match err {
            DatabaseError::Connect(e) => e.into(),
            DatabaseError::Migrate(e) => e.into(),
            DatabaseError::InvalidConfig(message) => ExecutaError::InvalidConfigValue {
                key: "database".to_string(),
                message,
            },
        }
    }
}

impl From<crate::config::ConfigLoadError> for ExecutaError {
    fn from(err: crate::config::ConfigLoadError) -> Self {
        use crate::config::ConfigLoadError;
        match err {
            ConfigLoadError::Config(e) => e.into(),
            ConfigLoadError::MissingRequired(key) => ExecutaError::InvalidConfigValue {
                key,
                message: "missing".to_string(),
            },
            ConfigLoadError::InvalidValue { key, message } => {
                ExecutaError::InvalidConfigValue { key, message }
            }
            ConfigLoadError::Io(e) => e.into(),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of
/// attempts. Only [`ExecutaError::is_transient`] failures are retried.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> ExecutaResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ExecutaResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    error_code = %e.error_code(),
                    "Retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                e.log();
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_display_carries_code() {
        let err = ExecutaError::AssistantNotFound("a-1".to_string());
        assert_eq!(err.to_string(), "[E3001] Assistant not found");

        let err = ExecutaError::InvalidConfigValue {
            key: "server.port".to_string(),
            message: "must be positive".to_string(),
        };
        assert!(err.to_string().starts_with("[E2004]"));
    }

    #[test]
    fn test_public_message_strips_code() {
        assert_eq!(
            ExecutaError::HandoffNotEnabled("x".into()).public_message(),
            "Handoff not enabled for this assistant"
        );
        assert_eq!(
            ExecutaError::validation("assistantId and sessionId are required").public_message(),
            "assistantId and sessionId are required"
        );
        assert_eq!(
            ExecutaError::ZendeskNotConfigured.public_message(),
            "Zendesk not configured"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            ExecutaError::AssistantNotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ExecutaError::TicketNotLinked("t".into()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(ExecutaError::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            ExecutaError::Forbidden("nope".into()).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            ExecutaError::DatabaseQueryFailed("boom".into()).kind(),
            ErrorKind::Internal
        );
        assert!(!ExecutaError::ApiTimeout.is_client_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(ExecutaError::DatabaseUnavailable("timeout".to_string()).is_transient());
        assert!(ExecutaError::ApiTimeout.is_transient());
        assert!(ExecutaError::ZendeskApi {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ExecutaError::ZendeskApi {
            status: 422,
            body: String::new()
        }
        .is_transient());
        assert!(!ExecutaError::validation("nope").is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ExecutaError::InvalidHandoffSettings("bad".into()).error_code(),
            "E3002"
        );
        assert_eq!(
            ExecutaError::InvalidTicketAction("x".into()).error_code(),
            "E4004"
        );
        assert_eq!(ExecutaError::ZendeskNotConfigured.error_code(), "E5007");
        assert_eq!(
            ExecutaError::notification("slack", "500").error_code(),
            "E6001"
        );
        assert_eq!(ExecutaError::Unauthorized.error_code(), "E9007");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_adds_at_most_a_quarter() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            jitter: true,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let fraction = jitter_fraction();
            assert!((0.0..1.0).contains(&fraction));
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay < Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_notification_retry_profile() {
        let config = RetryConfig::for_notifications(7);
        assert_eq!(config.max_attempts, 7);
        assert!(config.delay_for_attempt(0) >= Duration::from_secs(30));
        assert!(config.delay_for_attempt(30) <= Duration::from_millis(4_500_000));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ExecutaResult<()> = retry_async_with_config(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExecutaError::validation("bad input"))
            },
            RetryConfig {
                jitter: false,
                initial_delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_async_with_config(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ExecutaError::ApiTimeout)
                } else {
                    Ok(n)
                }
            },
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ExecutaError = json_err.into();
        assert!(matches!(err, ExecutaError::SerializationError(_)));
    }
}
