//! Offertory CLI - command-line interface for operating the Offertory
//! server's health and recovery surface.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{checks, config, incidents, recover, status};
use output::OutputFormat;

/// Offertory - donation intake platform operations CLI
#[derive(Parser)]
#[command(
    name = "offertory",
    version = "0.1.0",
    about = "Offertory operations CLI",
    long_about = "CLI tool for inspecting service health, managing incidents, and \
                  driving recovery on an Offertory server.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "OFFERTORY_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show overall service health
    Status(status::StatusArgs),

    /// Incident management operations
    #[command(subcommand)]
    Incidents(incidents::IncidentCommands),

    /// Force an immediate health check cycle
    Checks(checks::ChecksArgs),

    /// Recovery operations
    #[command(subcommand)]
    Recover(recover::RecoverCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(config::load_api_url)
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Status(args) => status::execute(args, &client, format).await,
        Commands::Incidents(cmd) => incidents::execute(cmd, &client, format).await,
        Commands::Checks(args) => checks::execute(args, &client, format).await,
        Commands::Recover(cmd) => recover::execute(cmd, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
