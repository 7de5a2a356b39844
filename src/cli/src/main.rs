//! Agora CLI - administration of sessions and role levels.
//!
//! Talks to the Agora API server over HTTP.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, operations, role, session};
use output::OutputFormat;

/// Agora - session and role administration
#[derive(Parser)]
#[command(
    name = "agora",
    version,
    about = "Agora - session and role administration",
    long_about = "CLI tool for issuing and revoking sessions, assigning role levels and checking operations against the Agora API.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "AGORA_API_URL")]
    api_url: Option<String>,

    /// Bearer token for authenticated routes
    #[arg(long, global = true, env = "AGORA_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health(health::HealthArgs),

    /// List registered operations and their required levels
    Operations,

    /// Check whether the current token may perform an operation
    Check(operations::CheckArgs),

    /// Session management
    #[command(subcommand)]
    Session(session::SessionCommands),

    /// Role level management
    #[command(subcommand)]
    Role(role::RoleCommands),

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
        .or_else(|| config::load_value(config::API_URL_KEY))
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let token = cli
        .token
        .clone()
        .or_else(|| config::load_value(config::TOKEN_KEY));

    let format = cli.output;
    let result = match cli.command {
        // Config commands work without a reachable server.
        Commands::Config(cmd) => config::execute(cmd, format).await,
        command => run(command, &api_url, token, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(
    command: Commands,
    api_url: &str,
    token: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let client = client::ApiClient::new(api_url, token)?;

    match command {
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Operations => operations::list(&client, format).await,
        Commands::Check(args) => operations::check(args, &client, format).await,
        Commands::Session(cmd) => session::execute(cmd, &client, format).await,
        Commands::Role(cmd) => role::execute(cmd, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    }
}
