//! Main entry point for the Parley server CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use parley_server::{commands, server};
use shared::config::server::Config;

/// Main CLI structure for the Parley server
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Real-time messaging backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Parley CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// The port number to bind the server to (e.g., 8080)
        #[arg(long, short)]
        port: u16,

        /// Path to a YAML, JSON or TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Inspect the resolved configuration
    Config {
        /// Print the configuration as YAML
        #[arg(long)]
        print: bool,

        /// Path to a YAML, JSON or TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Loads the configuration and serves until shutdown.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(port: u16, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config = Config::load_config(config, Some(port))?;
    server::run(resolved_config).await
}

/// # Errors
/// Returns an error if the configuration cannot be loaded or printed.
pub fn handle_config_command(print: bool, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config = Config::load_config(config, None)?;
    if print {
        commands::config::print_config_to_stdout(&resolved_config)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
        Commands::Config { print, config } => handle_config_command(print, config),
    }
}
