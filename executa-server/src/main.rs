use clap::{Parser, Subcommand};
use colored::Colorize;
use executa_core::{ConfigLoadError, ExecutaConfig};
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{
    cmd_check_config, cmd_migrate, cmd_serve, handle_outbox_command, OutboxCommand, ServeArgs,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "executa")]
#[command(version = VERSION)]
#[command(about = "Executa - human handoff and support ticket service for AI assistants")]
#[command(long_about = r#"
Executa escalates AI assistant conversations to human agents. It records
handoff requests as support tickets, notifies the team over email, Slack,
Teams or a custom webhook, and keeps tickets in sync with Zendesk.

Use 'executa migrate' to prepare the database, then 'executa serve' to
start the API. 'executa outbox' inspects and replays queued notifications.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP API and the notification worker")]
    Serve(ServeArgs),

    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Inspect and replay queued notifications")]
    Outbox {
        #[command(subcommand)]
        action: Option<OutboxCommand>,
    },

    #[command(about = "Load and validate configuration, then print a summary")]
    CheckConfig,

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = ExecutaConfig::load();

    init_logging(cli.verbose, config.as_ref().ok());

    match run(cli, config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, config: Option<&ExecutaConfig>) {
    let fallback = config.map(|c| c.log_level().to_string()).unwrap_or_else(|| "info".to_string());
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    };

    let json = config.is_some_and(|c| c.logging.json_format);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli, config: Result<ExecutaConfig, ConfigLoadError>) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version { detailed } => cmd_version(detailed),
        Commands::CheckConfig => cmd_check_config(config),
        Commands::Serve(args) => cmd_serve(config?, args).await,
        Commands::Migrate => cmd_migrate(config?).await,
        Commands::Outbox { action } => handle_outbox_command(config?, action).await,
    }
}

fn cmd_version(detailed: bool) -> anyhow::Result<()> {
    if detailed {
        println!("{}", "Executa Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Handoff Channels:".bold());
        println!("    ✉ Email (SendGrid{})", if cfg!(feature = "smtp") { ", SMTP" } else { "" });
        println!("    # Slack");
        println!("    ▣ Microsoft Teams");
        println!("    ⇄ Custom webhook");
        println!("    ◎ Zendesk");
        println!();
        println!("  {}", "Build Information:".bold());
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("executa {}", VERSION);
    }

    Ok(())
}
