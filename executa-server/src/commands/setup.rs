use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use executa_core::{
    redact_url, ConfigLoadError, Database, ExecutaConfig, PoolSettings, StorageBackend,
};

pub async fn cmd_migrate(config: ExecutaConfig) -> Result<()> {
    println!("{}", "Running Executa migrations...".cyan().bold());
    println!();

    if config.server.storage == StorageBackend::Memory {
        println!(
            "  {} Storage is 'memory'; there is nothing to migrate.",
            "!".yellow()
        );
        return Ok(());
    }

    println!(
        "  {} Database URL: {}",
        "→".blue(),
        redact_url(config.database_url())
    );
    println!("  {} Connecting to database...", "→".blue());
    let db = Database::connect(&PoolSettings::from(&config.database)).await?;

    println!("  {} Applying migrations...", "→".blue());
    db.run_migrations().await?;

    println!("  {} Verifying connection...", "→".blue());
    db.health_check().await?;
    db.close().await;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        "Database is up to date.".green()
    );
    Ok(())
}

pub fn cmd_check_config(config: Result<ExecutaConfig, ConfigLoadError>) -> Result<()> {
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            println!("{} {}", "✗".red().bold(), "Configuration is invalid".red());
            return Err(e.into());
        }
    };

    let email_provider = if config.email.sendgrid_api_key.is_some() {
        "SendGrid".to_string()
    } else if let Some(host) = &config.email.smtp_host {
        format!("SMTP ({}:{})", host, config.email.smtp_port)
    } else {
        "none".to_string()
    };
    let storage = match config.server.storage {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Setting").fg(comfy_table::Color::Cyan),
            Cell::new("Value").fg(comfy_table::Color::Cyan),
        ]);

    let rows = [
        ("Storage", storage.to_string()),
        ("Bind address", config.bind_address()),
        ("Database", redact_url(config.database_url())),
        ("Log level", config.log_level().to_string()),
        ("JSON logs", config.logging.json_format.to_string()),
        ("Email provider", email_provider),
        ("From address", config.email.from_email.clone()),
        ("Support inbox", config.email.support_email.clone()),
        ("Zendesk", if config.zendesk.is_configured() { "configured" } else { "not configured" }.to_string()),
        ("HTTP timeout", format!("{}s", config.notifications.http_timeout_secs)),
        ("Outbox poll", format!("{}s", config.notifications.outbox_poll_interval_secs)),
        ("Max attempts", config.notifications.max_attempts.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }

    println!("{}", table);
    println!();
    println!("{} {}", "✓".green().bold(), "Configuration is valid".green());
    Ok(())
}
