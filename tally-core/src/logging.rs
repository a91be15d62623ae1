//! Logging for the tally client and CLI.
//!
//! Diagnostics go to stderr so stdout stays free for event output (the
//! `listen` command prints one line or JSON object per event). A second
//! copy is written to `tally.log` in the log directory, rotated daily.
//! The directory is `logging.directory` from the config file, or
//! `<data dir>/logs` when that is empty (see `AppConfig::effective_log_dir`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{TallyError, TallyResult};

/// File name prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "tally.log";

/// Filter used when the configured directive does not parse.
const FALLBACK_FILTER: &str = "info";

/// Keeps the background file writer alive. Dropping it flushes `tally.log`.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Parse `level` as an `EnvFilter` directive.
///
/// Accepts a bare level (`"debug"`) or per-crate directives such as
/// `"tally_socket=trace,info"`, which is how connection-level tracing is
/// turned on without flooding the CLI output.
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Install the global subscriber: compact stderr output plus the rolling
/// file in `log_dir`. With `json_output` the file gets one JSON object per
/// line (thread ids, file and line included); stderr stays human-readable.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> TallyResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let (json_file, text_file) = if json_output {
        let layer = fmt::layer()
            .with_writer(writer)
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        (None, Some(layer))
    };

    tracing_subscriber::registry()
        .with(filter(level))
        .with(stderr_layer)
        .with(json_file)
        .with(text_file)
        .try_init()
        .map_err(|e| TallyError::Internal(format!("logging already initialized: {e}")))?;

    tracing::info!(
        "logging to {} at level={level}",
        log_dir.join(LOG_FILE_PREFIX).display()
    );

    Ok(LogGuard { _guard: guard })
}

/// Stderr-only logging for embedders and tests. Silently does nothing when
/// a subscriber is already installed.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true).compact())
        .try_init();
}
