//! Platform detection and OS-specific directories.

use std::path::PathBuf;
use crate::error::{TallyError, TallyResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Linux
        }
    }

    /// Get the platform-specific application data directory.
    ///
    /// - Windows: `%APPDATA%/Tally`
    /// - macOS: `~/Library/Application Support/Tally`
    /// - Linux: `~/.local/share/Tally`
    pub fn data_dir() -> TallyResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| TallyError::Config("could not determine data directory".into()))?;
        Ok(base.join("Tally"))
    }

    /// Get the platform-specific configuration directory.
    pub fn config_dir() -> TallyResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| TallyError::Config("could not determine config directory".into()))?;
        Ok(base.join("Tally"))
    }

    /// Get a human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
            Platform::Android => "Android",
            Platform::Ios => "iOS",
        }
    }

    /// Hostname used as the device label in the auth handshake.
    pub fn hostname() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "tally-client".to_string())
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
