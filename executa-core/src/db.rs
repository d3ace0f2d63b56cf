use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pool sizing and timeouts, lifted out of the `[database]` config section.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(cfg: &DatabaseConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            max_connections: cfg.pool_max_connections,
            min_connections: cfg.pool_min_connections,
            acquire_timeout: Duration::from_secs(cfg.pool_acquire_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.pool_idle_timeout_secs),
        }
    }
}

pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:****@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Could not reach PostgreSQL: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),

    #[error("Invalid database settings: {0}")]
    InvalidConfig(String),
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(settings: &PoolSettings) -> Result<Self, DatabaseError> {
        if settings.url.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig("database url is empty".to_string()));
        }
        info!(url = %redact_url(&settings.url), "Opening PostgreSQL pool");

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(settings.idle_timeout)
            .connect(&settings.url)
            .await?;

        debug!(max = settings.max_connections, "PostgreSQL pool ready");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(DatabaseError::Migrate)?;
        info!("Schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Handoff creation writes session, request, message and outbox rows
    /// inside one of these.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DatabaseError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
