//! Global error types for the Tally real-time client.
//!
//! All error categories across the workspace are unified into a single
//! `TallyError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using TallyError.
pub type TallyResult<T> = Result<T, TallyError>;

/// Unified error type covering all error categories in Tally.
#[derive(Error, Debug)]
pub enum TallyError {
    // -- Configuration errors --
    /// Failed to load or parse configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// The transport could not be opened or failed mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server rejected the credentials, or never acknowledged them.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An outbound operation was attempted outside the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// `reconnect` was called without any stored credentials.
    #[error("no credentials available; call connect first")]
    MissingCredentials,

    /// The background connection task has stopped.
    #[error("connection task is not running")]
    ClientClosed,

    // -- Protocol errors --
    /// An inbound frame could not be decoded into an envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for TallyError {
    fn from(e: serde_json::Error) -> Self {
        TallyError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TallyError {
    fn from(e: toml::de::Error) -> Self {
        TallyError::Config(e.to_string())
    }
}
