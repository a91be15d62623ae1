//! Listen command - stream every event to the terminal until Ctrl+C.

use std::time::Duration;

use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use tally_core::config::ConfigHandle;
use tally_core::error::TallyResult;
use tally_socket::{DisconnectMode, RealtimeEvent};

use crate::OutputFormat;

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    token: Option<String>,
    channels: Vec<String>,
    format: OutputFormat,
) -> TallyResult<()> {
    let (manager, credentials) = super::create_manager(&config, url, token).await?;
    let timeout = {
        let cfg = config.read().await;
        cfg.server.connect_timeout() + Duration::from_millis(cfg.socket.auth_timeout_ms)
    };

    for channel in &channels {
        manager.subscribe(channel).await;
    }

    let streams = manager.streams();
    let mut chat = streams.subscribe_chat();
    let mut typing = streams.subscribe_typing();
    let mut notifications = streams.subscribe_notifications();
    let mut budget = streams.subscribe_budget();
    let mut transactions = streams.subscribe_transactions();
    let mut system = streams.subscribe_system();
    let mut generic = streams.subscribe_generic();
    let mut errors = streams.subscribe_errors();
    let mut states = manager.state_receiver();

    super::connect_and_wait(&manager, credentials, timeout).await?;

    println!(
        "{} Listening on {} channel(s). Press Ctrl+C to stop.",
        style("[2/2]").bold().dim(),
        channels.len()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = chat.recv() => handle(event, format),
            event = notifications.recv() => handle(event, format),
            event = budget.recv() => handle(event, format),
            event = transactions.recv() => handle(event, format),
            event = system.recv() => handle(event, format),
            event = generic.recv() => handle(event, format),
            indicator = typing.recv() => match indicator {
                Ok(indicator) => match format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({"stream": "typing", "indicator": indicator})
                    ),
                    OutputFormat::Text => println!(
                        "{} {} {}",
                        style("typing").magenta(),
                        indicator.sender,
                        if indicator.is_typing { "is typing" } else { "stopped typing" }
                    ),
                },
                Err(e) => lagged(e),
            },
            err = errors.recv() => match err {
                Ok(err) => match format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::json!({"stream": "error", "error": err})
                    ),
                    OutputFormat::Text => println!("{} {err}", style("error").red().bold()),
                },
                Err(e) => lagged(e),
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("{} {state}", style("state").cyan());
            }
        }
    }

    println!("Disconnecting...");
    manager.disconnect(DisconnectMode::Pause).await;
    Ok(())
}

fn handle(event: Result<RealtimeEvent, RecvError>, format: OutputFormat) {
    match event {
        Ok(event) => print_event(&event, format),
        Err(e) => lagged(e),
    }
}

fn lagged(e: RecvError) {
    if let RecvError::Lagged(skipped) = e {
        warn!("output fell behind, {skipped} event(s) skipped");
    }
}

fn print_event(event: &RealtimeEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "stream": event.category.as_str(),
                "event": event.event(),
                "channel": event.channel(),
                "data": event.data(),
                "timestamp": event.envelope.timestamp.to_rfc3339(),
            });
            println!("{line}");
        }
        OutputFormat::Text => {
            let payload = super::truncate(&event.data().to_string(), 120);
            println!(
                "{} {:<12} {:<24} {} {}",
                style(event.envelope.timestamp.format("%H:%M:%S")).dim(),
                style(event.category.as_str()).green(),
                event.event(),
                event.channel().map(|c| format!("#{c}")).unwrap_or_default(),
                style(payload).dim()
            );
        }
    }
}
