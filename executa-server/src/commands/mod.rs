pub mod outbox;
pub mod serve;
pub mod setup;

pub use outbox::{handle_outbox_command, OutboxCommand};
pub use serve::{cmd_serve, ServeArgs};
pub use setup::{cmd_check_config, cmd_migrate};

use colored::Colorize;
use executa_core::{
    init_database, redact_url, retry_async_with_config, ExecutaConfig, ExecutaError, MemoryStore,
    Repositories, RetryConfig, StorageBackend,
};
use std::sync::Arc;

/// Opens the configured storage backend. Postgres connections are retried
/// and migrated before use.
pub(crate) async fn open_repositories(config: &ExecutaConfig) -> anyhow::Result<Repositories> {
    match config.server.storage {
        StorageBackend::Memory => {
            println!(
                "  {} Using in-memory storage (data is lost on exit)",
                "!".yellow()
            );
            Ok(Repositories::memory(Arc::new(MemoryStore::new())))
        }
        StorageBackend::Postgres => {
            println!(
                "  {} Database URL: {}",
                "→".blue(),
                redact_url(config.database_url())
            );
            let db = retry_async_with_config(
                || async { init_database(config).await.map_err(ExecutaError::from) },
                RetryConfig::for_database(),
            )
            .await?;
            Ok(Repositories::postgres(db))
        }
    }
}

pub(crate) async fn close_repositories(repos: &Repositories) {
    if let Some(db) = repos.database() {
        db.close().await;
    }
}
