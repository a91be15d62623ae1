//! CLI command implementations.

pub mod config;
pub mod listen;
pub mod send;

use std::time::Duration;

use console::style;
use tokio::sync::broadcast::error::TryRecvError;

use tally_core::config::{AppConfig, ConfigHandle};
use tally_core::error::{TallyError, TallyResult};
use tally_socket::{ClientError, ConnectionState, Credentials, ErrorKind, SocketManager};

/// Apply command-line overrides and build a manager plus credentials.
pub async fn create_manager(
    config: &ConfigHandle,
    url: Option<String>,
    token: Option<String>,
) -> TallyResult<(SocketManager, Credentials)> {
    {
        let mut cfg = config.write().await;
        if let Some(url) = url {
            cfg.server.url = AppConfig::sanitize_server_url(&url);
        }
        if let Some(token) = token {
            cfg.server.token = token;
        }
    }

    let cfg = config.read().await;
    if cfg.server.url.is_empty() {
        return Err(TallyError::MissingConfig(
            "server url. Use --url or set server.url in config".into(),
        ));
    }
    if cfg.server.token.is_empty() {
        return Err(TallyError::MissingConfig(
            "auth token. Use --token or set server.token in config".into(),
        ));
    }

    let manager = SocketManager::from_config(&cfg)?;
    Ok((manager, Credentials::new(cfg.server.token.clone())))
}

/// Connect and wait until the handshake either succeeds or fails for good.
pub async fn connect_and_wait(
    manager: &SocketManager,
    credentials: Credentials,
    timeout: Duration,
) -> TallyResult<()> {
    let mut errors = manager.streams().subscribe_errors();
    let mut states = manager.state_receiver();

    println!(
        "{} Connecting...",
        style("[1/2]").bold().dim(),
    );
    manager.connect(credentials).await?;

    let settled = tokio::time::timeout(
        timeout,
        states.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Failed)),
    )
    .await
    .map_err(|_| TallyError::Timeout(format!("not connected after {timeout:?}")))?
    .map(|s| *s)
    .map_err(|_| TallyError::ClientClosed)?;

    if settled == ConnectionState::Connected {
        println!("  {} Authenticated.", style("OK").green().bold());
        return Ok(());
    }

    let mut last = None;
    loop {
        match errors.try_recv() {
            Ok(err) => last = Some(err),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    let err = failure_error(last);
    println!("  {} {err}", style("FAIL").red().bold());
    Err(err)
}

/// Error for a manager that settled in `Failed`, based on the last error it reported.
fn failure_error(last: Option<ClientError>) -> TallyError {
    match last {
        Some(err) if err.kind == ErrorKind::Authentication => TallyError::AuthFailed(err.message),
        Some(err) => TallyError::Transport(err.to_string()),
        None => TallyError::Transport("connection failed".into()),
    }
}

/// Truncate a string to a maximum length, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
