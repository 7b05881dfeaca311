//! Process-wide logging bootstrap.
//!
//! Human-readable lines go to stderr; when a log file is configured, the same
//! events are also written there through a non-blocking appender. The
//! returned [`LoggingGuards`] must be held until the process exits, otherwise
//! buffered file output is lost.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the log filter.
pub const LOG_ENV_VAR: &str = "DTR_LOG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    stderr: bool,
    log_file: Option<PathBuf>,
}

impl LogConfig {
    /// Start from `DTR_LOG`, falling back to `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var(LOG_ENV_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        Self {
            level,
            stderr: false,
            log_file: None,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    /// Also write events to `path` (parent directories are created).
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Keeps background log writers alive.
#[must_use = "dropping the guards flushes and stops the file writer"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|err| LoggingError::Filter {
        filter: config.level.clone(),
        message: err.to_string(),
    })?;

    let stderr_layer = config.stderr.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "runner.log".into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| LoggingError::AlreadyInitialized(err.to_string()))?;

    Ok(LoggingGuards { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LogConfig::from_env("info")
            .with_level("debug")
            .with_stderr()
            .with_file("/tmp/dtr/test-1.log");
        assert_eq!(config.level(), "debug");
        assert_eq!(config.log_file(), Some(Path::new("/tmp/dtr/test-1.log")));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig::from_env("info").with_level("dtr=[");
        match init_logging(&config) {
            Err(LoggingError::Filter { filter, .. }) => assert_eq!(filter, "dtr=["),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("invalid filter accepted"),
        }
    }
}
