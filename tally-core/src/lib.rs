//! Tally Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Tally crates:
//! - Client configuration (server URL, credentials, socket tuning)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Platform directory helpers
//! - Common constants and wire event names

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{TallyError, TallyResult};
pub use logging::init_logging;
pub use platform::Platform;
