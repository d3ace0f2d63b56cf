use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use executa_core::{
    Account, Assistant, AssignmentMethod, ExecutaConfig, HandoffMethod, HandoffSettings,
    Repositories, Services, StorageBackend, User, UserRole,
};
use executa_server::{router, AppState};
use tracing::info;
use uuid::Uuid;

use super::{close_repositories, open_repositories};

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, help = "Bind host (overrides server.host)")]
    host: Option<String>,

    #[arg(short, long, help = "Bind port (overrides server.port and PORT)")]
    port: Option<u16>,

    #[arg(long, help = "Keep all data in memory instead of PostgreSQL")]
    memory: bool,

    #[arg(long, requires = "memory", help = "Seed a demo account and print its API key")]
    demo: bool,
}

pub async fn cmd_serve(mut config: ExecutaConfig, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.memory {
        config.server.storage = StorageBackend::Memory;
    }

    println!("{}", "Starting Executa...".cyan().bold());
    println!();

    let repos = open_repositories(&config).await?;
    let services = Services::new(&config, repos.clone())?;

    if args.demo {
        seed_demo(&repos).await?;
    }

    let worker = services
        .outbox
        .start_worker(config.notifications.poll_interval());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    println!("  {} Listening on http://{}", "✓".green().bold(), address);
    info!(address = %address, "HTTP API listening");

    let served = axum::serve(listener, router(AppState::new(services)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    worker.stop().await;
    close_repositories(&repos).await;
    served?;

    println!("{} {}", "✓".green().bold(), "Executa stopped".green());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// One account with an owner key and an assistant routed to the internal
/// inbox, for trying the API against the memory backend.
async fn seed_demo(repos: &Repositories) -> Result<()> {
    let account = repos.users.insert_account(&Account::new("Demo")).await?;
    let api_key = format!("demo-{}", Uuid::new_v4().simple());
    repos
        .users
        .insert_user(&User::new(
            account.id,
            "Demo Owner",
            "owner@demo.local",
            UserRole::Owner,
            api_key.clone(),
        ))
        .await?;

    let mut settings = HandoffSettings::default();
    settings.handoff_method = HandoffMethod::InternalNotification;
    settings.assignment.auto_assign = true;
    settings.assignment.assignment_method = AssignmentMethod::LeastBusy;
    let assistant = repos
        .assistants
        .insert_assistant(&Assistant::new(account.id, "Demo Assistant").with_handoff(&settings)?)
        .await?;

    println!("  {}", "Demo account".yellow().bold());
    println!("    API key:      {}", api_key.green());
    println!("    Assistant ID: {}", assistant.id);
    Ok(())
}
