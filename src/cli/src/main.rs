//! CRM CLI - command-line interface for the multi-tenant CRM server.
//!
//! Provides commands for pipeline stages, leads, deals, customers,
//! permissions, health and configuration.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, customer, deal, health, lead, permission, stage};
use output::OutputFormat;

/// CRM - multi-tenant sales pipeline CLI
#[derive(Parser)]
#[command(
    name = "crm",
    version,
    about = "CRM - multi-tenant sales pipeline",
    long_about = "CLI tool for working leads and deals through the pipeline and inspecting permissions.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "CRM_API_URL")]
    api_url: Option<String>,

    /// Bearer token
    #[arg(long, global = true, env = "CRM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Organization to act in (customers of several organizations, superusers)
    #[arg(long, global = true, env = "CRM_ORGANIZATION")]
    organization: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pipeline stages
    #[command(subcommand)]
    #[command(visible_alias = "stages")]
    Stage(stage::StageCommands),

    /// Lead operations
    #[command(subcommand)]
    Lead(lead::LeadCommands),

    /// Deal operations
    #[command(subcommand)]
    Deal(deal::DealCommands),

    /// Customer operations
    #[command(subcommand)]
    Customer(customer::CustomerCommands),

    /// Inspect your permissions
    #[command(subcommand)]
    #[command(visible_alias = "permissions")]
    Permission(permission::PermissionCommands),

    /// Check server health
    Health(health::HealthArgs),

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

    let format = cli.output;

    // Config commands must work even when the stored file is unusable.
    let result = match cli.command {
        Commands::Config(cmd) => config::execute(cmd, format).await,
        command => match connect(cli.api_url, cli.token, cli.organization) {
            Ok(client) => run(command, &client, format).await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

fn connect(
    api_url: Option<String>,
    token: Option<String>,
    organization: Option<String>,
) -> Result<client::ApiClient> {
    let settings = config::Settings::resolve(api_url, token, organization, &config::load()?)?;
    client::ApiClient::new(&settings.api_url, settings.token, settings.organization)
}

async fn run(command: Commands, client: &client::ApiClient, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Stage(cmd) => stage::execute(cmd, client, format).await,
        Commands::Lead(cmd) => lead::execute(cmd, client, format).await,
        Commands::Deal(cmd) => deal::execute(cmd, client, format).await,
        Commands::Customer(cmd) => customer::execute(cmd, client, format).await,
        Commands::Permission(cmd) => permission::execute(cmd, client, format).await,
        Commands::Health(args) => health::execute(args, client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    }
}
