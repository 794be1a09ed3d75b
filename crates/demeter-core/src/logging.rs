//! Structured logging for the watchdog
//!
//! Built on `tracing` with two sinks:
//!
//! - **Console** (stdout): warnings and errors only, unless `verbose` is set,
//!   in which case everything that passes the level filter is printed.
//! - **Log file**: append-only, receives everything that passes the level
//!   filter. Defaults to `./logs/info.log`.
//!
//! Both sinks share the configured format (pretty or JSON lines).
//!
//! # Correlation Fields
//!
//! Use these field names consistently in events:
//! - `cycle`: poll cycle number
//! - `application`: application name
//! - `failures`, `threshold`: failure tracker state
//! - `num_tags`: tag count reported by a scan row

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Global flag to track if logging has been initialized
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    /// Can be overridden by RUST_LOG environment variable
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Log file path; `None` disables the file sink
    pub file: Option<PathBuf>,

    /// Mirror info-level logs to the console
    pub verbose: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            verbose: false,
        }
    }
}

/// Default log file location, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "./logs/info.log";

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn ensure_parent_dir(path: &std::path::Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn open_log_file(path: &std::path::Path) -> io::Result<std::fs::File> {
    ensure_parent_dir(path)?;
    let existed = path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    #[cfg(unix)]
    if !existed {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
    }
    #[cfg(not(unix))]
    let _ = existed;
    Ok(file)
}

/// Level ceiling applied to the console sink
#[must_use]
pub fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::WARN
    }
}

/// Initialize the global logging subscriber
///
/// Call once at startup. Subsequent calls return
/// `Err(LogError::AlreadyInitialized)`. `RUST_LOG` overrides the configured
/// level, e.g. `RUST_LOG=demeter_core=debug`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_writer = match &config.file {
        Some(path) => Some(Mutex::new(open_log_file(path)?)),
        None => None,
    };

    let console = console_level(config.verbose);

    match config.format {
        LogFormat::Pretty => {
            let file_layer = file_writer.map(|file| {
                fmt::layer()
                    .with_writer(file)
                    .with_target(true)
                    .with_ansi(false)
            });
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(true)
                        .with_filter(console),
                )
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let file_layer = file_writer.map(|file| {
                fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_timer(SystemTime)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true)
            });
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_timer(SystemTime)
                        .with_writer(std::io::stdout)
                        .with_target(true)
                        .with_current_span(true)
                        .with_span_list(false)
                        .flatten_event(true)
                        .with_filter(console),
                )
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        verbose = config.verbose,
        "Logging initialized"
    );

    Ok(())
}
