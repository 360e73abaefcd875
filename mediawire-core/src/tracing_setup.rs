//! Tracing setup for Mediawire
//!
//! Console output follows the level chosen on the command line (or
//! `RUST_LOG`). A second layer writes every event, spans included, to
//! `logs/mediawire-last-run.log`, replacing the previous run's file.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run debug log inside the logs directory.
pub const LOG_FILE_NAME: &str = "mediawire-last-run.log";

/// Failures while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tracing already initialized: {reason}")]
    AlreadyInitialized { reason: String },
}

/// Installs console and file layers, returning the debug log path.
///
/// Console output goes to stderr so command results on stdout stay
/// machine-readable.
///
/// # Errors
///
/// - `TracingError::LogFile` - Logs directory or file cannot be created
/// - `TracingError::AlreadyInitialized` - A global subscriber is already set
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let log_file_path = logs_path.join(LOG_FILE_NAME);

    let log_file = create_dir_all(logs_path)
        .and_then(|()| File::create(&log_file_path))
        .map_err(|source| TracingError::LogFile {
            path: log_file_path.clone(),
            source,
        })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TracingError::AlreadyInitialized {
            reason: e.to_string(),
        })?;

    tracing::debug!(
        "Tracing initialized: console={}, debug_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warnings and errors
    Warn,
    /// Session start and end, plus warnings
    Info,
    /// State transitions and transfer sizes
    Debug,
    /// Every frame
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use mediawire_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" | "warning" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("WARNING".parse::<CliLogLevel>().unwrap(), CliLogLevel::Warn);
        assert_eq!("debug".parse::<CliLogLevel>().unwrap(), CliLogLevel::Debug);
        assert!("verbose".parse::<CliLogLevel>().is_err());
    }

    #[test]
    fn test_log_level_display_round_trips() {
        for level in [
            CliLogLevel::Error,
            CliLogLevel::Warn,
            CliLogLevel::Info,
            CliLogLevel::Debug,
            CliLogLevel::Trace,
        ] {
            assert_eq!(level.to_string().parse::<CliLogLevel>().unwrap(), level);
        }
    }
}
