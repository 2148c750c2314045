//! devconnect CLI
//!
//! Single binary for working on a PBS cluster:
//! - connect (reserve a compute node and keep a tunnel to it)
//! - nodes (free node inventory)
//! - status and config management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dc_core::config;
use devconnect::commands;

#[derive(Parser)]
#[command(name = "devconnect")]
#[command(author, version, about = "Interactive sessions on a PBS cluster over ssh")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "DEVCONNECT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve a compute node and open a tunnel to it
    Connect {
        /// Open a shell on the compute node once connected
        #[arg(short, long)]
        terminal: bool,
    },

    /// List free compute nodes
    Nodes,

    /// Show the compute node session registered on this machine
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // A prompt may still be blocked on stdin after Ctrl+C
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Connect { terminal } => {
            commands::connect_command(&config_path, terminal).await?;
        }

        Commands::Nodes => {
            commands::nodes_command(&config_path).await?;
        }

        Commands::Status { json } => {
            commands::status_command(&config_path, json)?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config_path)?,
            ConfigAction::Get { key } => commands::config_get(&config_path, &key)?,
            ConfigAction::Set { key, value } => commands::config_set(&config_path, &key, &value)?,
            ConfigAction::Init { force } => commands::config_init(&config_path, force)?,
            ConfigAction::Path => commands::config_path(&config_path)?,
        },
    }

    Ok(())
}
