//! Tally CLI - command-line front end for the real-time event client.
//!
//! Useful for watching a backend's event feed from a terminal, scripting
//! one-off sends, and debugging connection behavior.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use tally_core::config::{AppConfig, ConfigHandle};
use tally_core::error::TallyResult;
use tally_core::logging;

/// Tally - real-time event client.
#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Tally real-time event client CLI",
    long_about = "A command-line interface for the Tally real-time event client.\n\
                   Connect to a backend, subscribe to channels, and watch or send events."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe, and print every event until Ctrl+C.
    Listen {
        /// Server URL (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Auth token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Channel to subscribe to. Repeatable.
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },
    /// Connect, send one event, and disconnect.
    Send {
        /// Server URL (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Auth token (overrides config).
        #[arg(short, long)]
        token: Option<String>,
        /// Event name.
        #[arg(short, long)]
        event: String,
        /// JSON payload.
        #[arg(short, long, default_value = "{}")]
        data: String,
        /// Channel the event belongs to.
        #[arg(short = 'C', long)]
        channel: Option<String>,
    },
    /// View or initialize the configuration file.
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> TallyResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")),
    };
    let config = AppConfig::load_or_default(&config_path)?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    let config_handle = ConfigHandle::new(config);

    info!("Tally CLI v{}", tally_core::constants::APP_VERSION);

    // Dispatch to command handlers
    match cli.command {
        Commands::Listen {
            url,
            token,
            channels,
        } => commands::listen::run(config_handle, url, token, channels, cli.format).await,
        Commands::Send {
            url,
            token,
            event,
            data,
            channel,
        } => {
            commands::send::run(config_handle, url, token, event, data, channel, cli.format).await
        }
        Commands::Config { action } => {
            commands::config::run(config_handle, &config_path, action, cli.format).await
        }
    }
}
