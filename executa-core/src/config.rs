use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutaConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub email: EmailConfig,
    pub zendesk: ZendeskConfig,
    pub notifications: NotificationsConfig,
    pub handoff: HandoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

/// Where the server keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub storage: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub sendgrid_api_key: Option<String>,

    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,

    #[serde(default)]
    pub smtp_host: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_username: Option<String>,

    #[serde(default)]
    pub smtp_password: Option<String>,

    /// Sender for platform support mail.
    #[serde(default = "default_from_email")]
    pub from_email: String,

    /// Sender for handoff notifications.
    #[serde(default = "default_handoff_from_email")]
    pub handoff_from_email: String,

    /// Inbox of the Executa support team.
    #[serde(default = "default_support_email")]
    pub support_email: String,

    /// HMAC-SHA256 key for `x-webhook-signature` on inbound replies.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Shared mailbox that may reply on any ticket.
    #[serde(default)]
    pub reply_address: Option<String>,

    /// Any sender at this domain may reply on any ticket.
    #[serde(default)]
    pub company_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZendeskConfig {
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Custom field id that carries the Executa ticket id.
    #[serde(default)]
    pub executa_ticket_id_field: Option<i64>,

    /// Custom field id that carries the assistant name.
    #[serde(default)]
    pub assistant_name_field: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub outbox_poll_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub outbox_batch_size: u32,

    #[serde(default = "default_lease")]
    pub outbox_lease_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_estimated_wait")]
    pub estimated_wait_minutes: u32,
}

fn default_database_url() -> String {
    "postgres://localhost/executa_dev".to_string()
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_email() -> String {
    "noreply@executa.ai".to_string()
}

fn default_handoff_from_email() -> String {
    "noreply@executa.app".to_string()
}

fn default_support_email() -> String {
    "support@executa.ai".to_string()
}

fn default_http_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    15
}

fn default_batch_size() -> u32 {
    20
}

fn default_lease() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    5
}

fn default_estimated_wait() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_min_connections: default_pool_min(),
            pool_max_connections: default_pool_max(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
            pool_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: StorageBackend::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sendgrid_api_key: None,
            sendgrid_base_url: default_sendgrid_base_url(),
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_email: default_from_email(),
            handoff_from_email: default_handoff_from_email(),
            support_email: default_support_email(),
            webhook_secret: None,
            reply_address: None,
            company_domain: None,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            outbox_poll_interval_secs: default_poll_interval(),
            outbox_batch_size: default_batch_size(),
            outbox_lease_secs: default_lease(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            estimated_wait_minutes: default_estimated_wait(),
        }
    }
}

impl ZendeskConfig {
    /// Domain, email and token must all be present.
    pub fn is_configured(&self) -> bool {
        [&self.domain, &self.email, &self.api_token]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

impl NotificationsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_poll_interval_secs)
    }
}

impl ExecutaConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("EXECUTA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut executa_config: ExecutaConfig = config.try_deserialize()?;
        executa_config.apply_env_overrides(|key| std::env::var(key).ok());
        executa_config.validate()?;

        Ok(executa_config)
    }

    /// Applies the well-known deployment variables on top of file and
    /// `EXECUTA__*` settings.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(level) = non_empty("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(port) = non_empty("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(key) = non_empty("SENDGRID_API_KEY") {
            self.email.sendgrid_api_key = Some(key);
        }
        if let Some(host) = non_empty("SMTP_HOST") {
            self.email.smtp_host = Some(host);
        }
        if let Some(port) = non_empty("SMTP_PORT").and_then(|p| p.parse().ok()) {
            self.email.smtp_port = port;
        }
        if let Some(user) = non_empty("SMTP_USERNAME") {
            self.email.smtp_username = Some(user);
        }
        if let Some(pass) = non_empty("SMTP_PASSWORD") {
            self.email.smtp_password = Some(pass);
        }
        if let Some(from) = non_empty("FROM_EMAIL") {
            self.email.from_email = from;
        }
        if let Some(support) = non_empty("EXECUTA_SUPPORT_EMAIL") {
            self.email.support_email = support;
        }
        if let Some(secret) = non_empty("EMAIL_WEBHOOK_SECRET") {
            self.email.webhook_secret = Some(secret);
        }
        if let Some(address) = non_empty("SUPPORT_EMAIL_ADDRESS") {
            self.email.reply_address = Some(address);
        }
        if let Some(domain) = non_empty("COMPANY_DOMAIN") {
            self.email.company_domain = Some(domain);
        }

        if let Some(domain) = non_empty("ZENDESK_DOMAIN") {
            self.zendesk.domain = Some(domain);
        }
        if let Some(email) = non_empty("ZENDESK_EMAIL") {
            self.zendesk.email = Some(email);
        }
        if let Some(token) = non_empty("ZENDESK_API_TOKEN") {
            self.zendesk.api_token = Some(token);
        }
        if let Some(field) = non_empty("ZENDESK_EXECUTA_TICKET_ID_FIELD").and_then(|f| f.parse().ok())
        {
            self.zendesk.executa_ticket_id_field = Some(field);
        }
        if let Some(field) = non_empty("ZENDESK_ASSISTANT_NAME_FIELD").and_then(|f| f.parse().ok()) {
            self.zendesk.assistant_name_field = Some(field);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server.storage == StorageBackend::Postgres {
            let url = self.database.url.trim();
            if url.is_empty() {
                return Err(ConfigLoadError::MissingRequired("database.url".to_string()));
            }
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(invalid(
                    "database.url",
                    "expected a postgres:// or postgresql:// URL",
                ));
            }
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(invalid(
                "database.pool_min_connections",
                "exceeds pool_max_connections",
            ));
        }
        if self.notifications.outbox_poll_interval_secs == 0 {
            return Err(invalid("notifications.outbox_poll_interval_secs", "must be at least 1"));
        }
        if self.notifications.max_attempts == 0 {
            return Err(invalid("notifications.max_attempts", "must be at least 1"));
        }

        // Directive strings such as `executa_core=debug` go straight to EnvFilter.
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        let level = self.logging.level.to_lowercase();
        if !level.contains('=') && !LEVELS.contains(&level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, LEVELS.join(", ")),
            ));
        }

        if self.email.smtp_host.is_some()
            && self.email.smtp_username.is_some() != self.email.smtp_password.is_some()
        {
            return Err(invalid(
                "email.smtp_username",
                "SMTP username and password must be set together",
            ));
        }

        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("executa.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

/// `.env` files never override variables that are already set.
fn load_dotenv_files() {
    let cwd = std::env::current_dir().ok();
    let candidates = cwd
        .iter()
        .flat_map(|dir| [dir.join(".env"), dir.join(".env.local")])
        .chain(get_config_dir().map(|dir| dir.join(".env")));

    for path in candidates.filter(|p| p.is_file()) {
        let _ = dotenvy::from_path(&path);
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("executa"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ExecutaConfig::default();

        assert_eq!(config.database.url, "postgres://localhost/executa_dev");
        assert_eq!(config.database.pool_max_connections, 10);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.storage, StorageBackend::Postgres);
        assert_eq!(config.email.from_email, "noreply@executa.ai");
        assert_eq!(config.email.handoff_from_email, "noreply@executa.app");
        assert_eq!(config.email.support_email, "support@executa.ai");
        assert_eq!(config.notifications.http_timeout_secs, 10);
        assert_eq!(config.notifications.max_attempts, 5);
        assert_eq!(config.handoff.estimated_wait_minutes, 5);
        assert!(!config.zendesk.is_configured());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ExecutaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_database_url() {
        let mut config = ExecutaConfig::default();
        config.database.url = "mysql://localhost/test".to_string();
        assert!(config.validate().is_err());

        config.server.storage = StorageBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_pool_bounds() {
        let mut config = ExecutaConfig::default();
        config.database.pool_min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_outbox_settings() {
        let mut config = ExecutaConfig::default();
        config.notifications.outbox_poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ExecutaConfig::default();
        config.notifications.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_level() {
        let mut config = ExecutaConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "executa_core=debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_half_configured_smtp() {
        let mut config = ExecutaConfig::default();
        config.email.smtp_host = Some("email-smtp.us-east-1.amazonaws.com".to_string());
        config.email.smtp_username = Some("AKIA".to_string());
        assert!(config.validate().is_err());

        config.email.smtp_password = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ExecutaConfig::default();
        config.apply_env_overrides(lookup(&[
            ("DATABASE_URL", "postgres://db/executa"),
            ("PORT", "8080"),
            ("SENDGRID_API_KEY", "SG.key"),
            ("FROM_EMAIL", "hello@executa.ai"),
            ("EXECUTA_SUPPORT_EMAIL", "help@executa.ai"),
            ("ZENDESK_DOMAIN", "https://acme.zendesk.com"),
            ("ZENDESK_EMAIL", "ops@acme.com"),
            ("ZENDESK_API_TOKEN", "tok"),
            ("ZENDESK_EXECUTA_TICKET_ID_FIELD", "360001"),
            ("SMTP_PORT", "not-a-number"),
            ("EMAIL_WEBHOOK_SECRET", "whsec"),
            ("COMPANY_DOMAIN", "acme.com"),
        ]));

        assert_eq!(config.database.url, "postgres://db/executa");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.email.sendgrid_api_key.as_deref(), Some("SG.key"));
        assert_eq!(config.email.from_email, "hello@executa.ai");
        assert_eq!(config.email.support_email, "help@executa.ai");
        assert_eq!(config.email.smtp_port, 587);
        assert!(config.zendesk.is_configured());
        assert_eq!(config.zendesk.executa_ticket_id_field, Some(360001));
        assert_eq!(config.email.webhook_secret.as_deref(), Some("whsec"));
        assert_eq!(config.email.company_domain.as_deref(), Some("acme.com"));
        assert!(config.email.reply_address.is_none());
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = ExecutaConfig::default();
        config.apply_env_overrides(lookup(&[("ZENDESK_DOMAIN", "  "), ("DATABASE_URL", "")]));

        assert!(config.zendesk.domain.is_none());
        assert_eq!(config.database.url, "postgres://localhost/executa_dev");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[server]
storage = "memory"

[notifications]
outbox_batch_size = 7

[handoff]
estimated_wait_minutes = 12
"#
        )
        .unwrap();

        let config = ExecutaConfig::load_from_paths(vec![file.path().to_path_buf()]).unwrap();

        assert_eq!(config.server.storage, StorageBackend::Memory);
        assert_eq!(config.notifications.outbox_batch_size, 7);
        assert_eq!(config.handoff.estimated_wait_minutes, 12);
        assert_eq!(config.notifications.max_attempts, 5);
    }
}
