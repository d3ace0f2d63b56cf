use anyhow::{bail, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use executa_core::{ExecutaConfig, OutboxEntry, OutboxFilter, OutboxStatus, Services};
use uuid::Uuid;

use super::{close_repositories, open_repositories};

#[derive(Subcommand)]
pub enum OutboxCommand {
    #[command(about = "List queued notifications")]
    List {
        #[arg(short, long, help = "Filter by status (pending, delivered, failed, dead)")]
        status: Option<String>,

        #[arg(short, long, help = "Only entries for this account")]
        account: Option<Uuid>,

        #[arg(short, long, default_value = "20", help = "Number of entries to show")]
        limit: u32,
    },

    #[command(about = "Reset a notification (or every dead one) to pending")]
    Retry {
        #[arg(help = "Outbox entry id", required_unless_present = "dead")]
        id: Option<Uuid>,

        #[arg(long, conflicts_with = "id", help = "Requeue every dead entry")]
        dead: bool,
    },

    #[command(about = "Deliver everything that is due, then exit")]
    Drain,
}

pub async fn handle_outbox_command(config: ExecutaConfig, action: Option<OutboxCommand>) -> Result<()> {
    let repos = open_repositories(&config).await?;
    let services = Services::new(&config, repos.clone())?;

    let result = match action {
        Some(OutboxCommand::List {
            status,
            account,
            limit,
        }) => cmd_outbox_list(&services, status, account, limit).await,
        Some(OutboxCommand::Retry { id, dead }) => cmd_outbox_retry(&services, id, dead).await,
        Some(OutboxCommand::Drain) => cmd_outbox_drain(&services).await,
        None => cmd_outbox_list(&services, None, None, 20).await,
    };

    close_repositories(&repos).await;
    result
}

async fn cmd_outbox_list(
    services: &Services,
    status: Option<String>,
    account: Option<Uuid>,
    limit: u32,
) -> Result<()> {
    let status = match status {
        Some(raw) => match raw.parse::<OutboxStatus>() {
            Ok(s) => Some(s),
            Err(e) => bail!(e),
        },
        None => None,
    };

    let entries = services
        .repos
        .outbox
        .list_outbox(&OutboxFilter {
            account_id: account,
            status,
            limit,
        })
        .await?;

    if entries.is_empty() {
        println!("{}", "No queued notifications.".dimmed());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Channel").fg(Color::Cyan),
            Cell::new("Target").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Attempts").fg(Color::Cyan),
            Cell::new("Next Attempt").fg(Color::Cyan),
            Cell::new("Last Error").fg(Color::Cyan),
        ]);

    for entry in &entries {
        table.add_row(entry_row(entry));
    }

    println!("{}", table);
    println!();
    println!("  {} entries shown", entries.len());
    Ok(())
}

fn entry_row(entry: &OutboxEntry) -> Vec<Cell> {
    let status_color = match entry.status {
        OutboxStatus::Delivered => Color::Green,
        OutboxStatus::Pending => Color::Blue,
        OutboxStatus::Failed => Color::Yellow,
        OutboxStatus::Dead => Color::Red,
    };
    let mut error = entry.last_error.clone().unwrap_or_else(|| "-".to_string());
    if error.chars().count() > 60 {
        error = format!("{}…", error.chars().take(60).collect::<String>());
    }

    vec![
        Cell::new(entry.id.to_string()),
        Cell::new(entry.channel.to_string()),
        Cell::new(&entry.target),
        Cell::new(entry.status.to_string()).fg(status_color),
        Cell::new(format!("{}/{}", entry.attempts, entry.max_attempts)),
        Cell::new(entry.next_attempt_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        Cell::new(error),
    ]
}

async fn cmd_outbox_retry(services: &Services, id: Option<Uuid>, dead: bool) -> Result<()> {
    let now = Utc::now();

    if dead {
        let count = services.repos.outbox.requeue_dead(None, now).await?;
        println!(
            "{} Requeued {} dead notification(s)",
            "✓".green().bold(),
            count
        );
        return Ok(());
    }

    let Some(id) = id else {
        bail!("An outbox entry id or --dead is required");
    };
    let entry = services.repos.outbox.requeue(None, id, now).await?;
    println!(
        "{} Requeued {} notification {}",
        "✓".green().bold(),
        entry.channel,
        entry.id
    );
    Ok(())
}

async fn cmd_outbox_drain(services: &Services) -> Result<()> {
    println!("{} {}", "→".blue(), "Delivering due notifications...".cyan());
    let report = services.outbox.drain().await?;

    println!(
        "{} Claimed {}, delivered {}, retrying {}, dead {}",
        if report.dead > 0 { "!".yellow().bold() } else { "✓".green().bold() },
        report.claimed,
        report.delivered,
        report.retrying,
        report.dead
    );
    Ok(())
}
