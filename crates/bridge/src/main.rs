//! labshell
//!
//! Interactive terminal sessions to homelab targets.

use std::path::PathBuf;

use bridge::{Config, ConnectionState, ConsoleSession, InventoryClient, TargetId};
use clap::{Parser, Subcommand};

/// labshell - interactive terminal sessions to homelab targets.
#[derive(Parser, Debug)]
#[command(name = "labshell")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List targets from the dashboard inventory
    List {
        /// Include targets without interactive access
        #[arg(long, short)]
        all: bool,
    },

    /// Open an interactive session (Ctrl+] closes it, then r reconnects)
    Connect {
        /// Target id as listed by `labshell list`
        target: String,
    },

    /// Print the session endpoint derived from the configuration
    Endpoint,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let _log_guard = bridge::logging::init(&config.logging, cli.verbose)?;
    tracing::info!(base_url = %config.dashboard.base_url, "labshell starting");

    match cli.command {
        Commands::List { all } => list_targets(&config, all).await,
        Commands::Connect { target } => connect(&config, TargetId::new(target)).await,
        Commands::Endpoint => {
            println!("{}", config.endpoint()?);
            Ok(())
        }
    }
}

fn inventory_client(config: &Config) -> anyhow::Result<InventoryClient> {
    Ok(InventoryClient::new(
        &config.base_url()?,
        &config.dashboard.inventory_path,
        config.request_timeout(),
    )?)
}

async fn list_targets(config: &Config, all: bool) -> anyhow::Result<()> {
    let inventory = inventory_client(config)?.fetch().await?;

    let targets: Vec<_> = inventory
        .targets()
        .iter()
        .filter(|t| all || t.interactive_access_allowed)
        .collect();

    if targets.is_empty() {
        println!("No targets found.");
        return Ok(());
    }

    println!("{:<16} {:<24} {:<22} {:<10} {}", "ID", "NAME", "ADDRESS", "USER", "ACCESS");
    for target in targets {
        println!(
            "{:<16} {:<24} {:<22} {:<10} {}",
            target.id.as_str(),
            target.display_name,
            format!("{}:{}", target.address, target.port),
            target.default_user,
            if target.interactive_access_allowed { "ssh" } else { "-" },
        );
    }
    Ok(())
}

async fn connect(config: &Config, id: TargetId) -> anyhow::Result<()> {
    let inventory = inventory_client(config)?.fetch().await?;
    let target = inventory.require(&id)?.clone();

    let session = ConsoleSession::new(config.controller_settings()?, target);
    let state = session.run().await?;
    tracing::info!(state = %state, "Session finished");

    println!();
    match state {
        ConnectionState::Failed => anyhow::bail!("session failed"),
        _ => Ok(()),
    }
}
