//! Config commands.

use std::path::Path;

use clap::Subcommand;
use console::style;

use tally_core::config::{AppConfig, ConfigHandle};
use tally_core::error::{TallyError, TallyResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub async fn run(
    config: ConfigHandle,
    path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> TallyResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = redacted(&*config.read().await);
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&cfg)?);
                }
                OutputFormat::Text => {
                    let text = toml::to_string_pretty(&cfg)
                        .map_err(|e| TallyError::Config(format!("failed to render config: {e}")))?;
                    println!("{}", style(path.display()).bold().underlined());
                    println!("{text}");
                }
            }
        }
        ConfigAction::Path => match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "path": path.display().to_string(), "exists": path.exists() })
                );
            }
            OutputFormat::Text => println!("{}", path.display()),
        },
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!(
                    "  {} {} already exists (use --force to overwrite)",
                    style("SKIP").yellow().bold(),
                    path.display()
                );
                return Ok(());
            }
            AppConfig::default().save_to_file(path)?;
            println!("  {} Wrote {}", style("OK").green().bold(), path.display());
        }
    }
    Ok(())
}

/// Copy of the config with the auth token masked.
fn redacted(cfg: &AppConfig) -> AppConfig {
    let mut cfg = cfg.clone();
    if !cfg.server.token.is_empty() {
        cfg.server.token = "********".to_string();
    }
    cfg
}
