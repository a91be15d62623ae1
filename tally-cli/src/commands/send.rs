//! Send command - deliver a single event and disconnect.

use std::time::Duration;

use console::style;
use serde_json::Value;

use tally_core::config::ConfigHandle;
use tally_core::error::{TallyError, TallyResult};
use tally_socket::DisconnectMode;

use crate::OutputFormat;

/// Run the send command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    token: Option<String>,
    event: String,
    data: String,
    channel: Option<String>,
    format: OutputFormat,
) -> TallyResult<()> {
    let payload: Value = serde_json::from_str(&data)
        .map_err(|e| TallyError::Config(format!("--data is not valid JSON: {e}")))?;

    let (manager, credentials) = super::create_manager(&config, url, token).await?;
    let timeout = {
        let cfg = config.read().await;
        cfg.server.connect_timeout() + Duration::from_millis(cfg.socket.auth_timeout_ms)
    };

    super::connect_and_wait(&manager, credentials, timeout).await?;

    println!("{} Sending {event}...", style("[2/2]").bold().dim());
    let result = manager.send(&event, payload, channel.as_deref()).await;
    manager.disconnect(DisconnectMode::Pause).await;
    result?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "sent": true, "event": event, "channel": channel })
            );
        }
        OutputFormat::Text => {
            println!("  {} Sent.", style("OK").green().bold());
        }
    }
    Ok(())
}
