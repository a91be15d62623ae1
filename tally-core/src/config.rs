//! Client configuration management.
//!
//! Handles loading, saving, and accessing configuration including the
//! server URL, credentials, and socket tuning. Configuration is persisted
//! as TOML on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{TallyError, TallyResult};
use crate::platform::Platform;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Real-time socket tuning.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Real-time endpoint (e.g., "wss://api.example.com/realtime").
    #[serde(default)]
    pub url: String,

    /// Bearer token sent in the auth handshake.
    #[serde(default)]
    pub token: String,

    /// Extra HTTP headers sent with the WebSocket upgrade request.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,

    /// Time allowed for the transport to open, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Socket lifecycle tuning: heartbeat, auth, reconnection and queueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Interval between heartbeat probes while connected.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Time allowed for the server to acknowledge credentials.
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_ms: u64,

    /// Whether lost connections are re-established automatically.
    #[serde(default = "default_true")]
    pub reconnect_enabled: bool,

    /// Delay before the first reconnection attempt.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Multiplier applied to the delay for each further attempt.
    #[serde(default = "default_reconnect_growth_factor")]
    pub reconnect_growth_factor: f64,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Attempts allowed before giving up in the `Failed` state.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default = "default_jitter_factor")]
    pub reconnect_jitter_factor: f64,

    /// Capacity of the bounded outbound queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of each broadcast output stream.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    constants::DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_heartbeat_interval() -> u64 {
    constants::DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_auth_timeout() -> u64 {
    constants::DEFAULT_AUTH_TIMEOUT_MS
}

fn default_reconnect_base_delay() -> u64 {
    1_000
}

fn default_reconnect_growth_factor() -> f64 {
    2.0
}

fn default_reconnect_max_delay() -> u64 {
    30_000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_outbound_queue_capacity() -> usize {
    constants::DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_event_channel_capacity() -> usize {
    constants::DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            custom_headers: HashMap::new(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            auth_timeout_ms: default_auth_timeout(),
            reconnect_enabled: true,
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_growth_factor: default_reconnect_growth_factor(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_jitter_factor: default_jitter_factor(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ServerConfig {
    /// Transport open timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SocketConfig {
    /// Check the values that would otherwise produce a broken client.
    pub fn validate(&self) -> TallyResult<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(TallyError::Config("heartbeat_interval_ms must be > 0".into()));
        }
        if self.auth_timeout_ms == 0 {
            return Err(TallyError::Config("auth_timeout_ms must be > 0".into()));
        }
        if self.reconnect_growth_factor.is_nan() || self.reconnect_growth_factor < 1.0 {
            return Err(TallyError::Config(
                "reconnect_growth_factor must be >= 1.0".into(),
            ));
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(TallyError::Config(
                "reconnect_base_delay_ms must not exceed reconnect_max_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter_factor) {
            return Err(TallyError::Config(
                "reconnect_jitter_factor must be within 0.0..=1.0".into(),
            ));
        }
        if self.outbound_queue_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(TallyError::Config("channel capacities must be > 0".into()));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from `path`, or defaults when no file exists there yet.
    pub fn load_or_default(path: &Path) -> TallyResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> TallyResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.socket.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> TallyResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TallyError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> TallyResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> TallyResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(Platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check whether the server connection is configured.
    pub fn is_server_configured(&self) -> bool {
        !self.server.url.is_empty() && !self.server.token.is_empty()
    }

    /// Sanitize and normalize a real-time endpoint URL.
    ///
    /// Ensures the URL has a WebSocket scheme (`http` maps to `ws`, `https`
    /// to `wss`, bare hosts default to `wss`) and strips trailing slashes.
    pub fn sanitize_server_url(url: &str) -> String {
        let trimmed = url.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_string()
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("wss://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }
}
