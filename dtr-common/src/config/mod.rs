//! Configuration system for the runner client.
//!
//! A [`RunnerConfig`] is assembled from, lowest precedence first:
//! - built-in defaults
//! - an optional TOML file
//! - `DTR_*` environment variables
//! - command-line flags (applied by the binary)
//!
//! [`RunnerConfig::validate`] runs last, after every layer has been applied.

pub mod env;

pub use env::{EnvError, EnvParser};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// One or more environment variables were invalid.
    #[error("invalid environment: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),

    /// The assembled configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Construction inputs of a runner client process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Host of the driver's request/reply endpoint.
    pub driver_host: String,
    /// Port of the driver's request/reply endpoint.
    pub driver_port: u16,
    /// Driver-assigned id of the test this process runs.
    pub test_id: String,
    /// Index of this run within the driver session.
    pub test_index: u32,
    /// Directory receiving this process's log file.
    pub log_dir: PathBuf,
    /// Log at debug level.
    pub debug: bool,
    /// Downgrade passing tests that under-use their node allotment to FAIL.
    pub fail_bad_cluster_utilization: bool,
    /// Maximum number of attempts per test; 1 disables deflaking.
    pub deflake_num: u32,
    /// Mirror controller log lines to the driver as `log` events.
    pub forward_logs: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            driver_host: "127.0.0.1".to_string(),
            driver_port: 5556,
            test_id: String::new(),
            test_index: 1,
            log_dir: PathBuf::from("results/logs"),
            debug: false,
            fail_bad_cluster_utilization: false,
            deflake_num: 1,
            forward_logs: true,
        }
    }
}

impl RunnerConfig {
    /// Load defaults, overlay an optional TOML file, then overlay `DTR_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let mut parser = EnvParser::new();
        config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(config)
    }

    /// Parse a TOML file; keys missing from the file keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values present in the environment.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        if let Some(host) = parser.get_string("DRIVER_HOST") {
            self.driver_host = host;
        }
        if let Some(port) = parser.get_u16("DRIVER_PORT") {
            self.driver_port = port;
        }
        if let Some(test_id) = parser.get_string("TEST_ID") {
            self.test_id = test_id;
        }
        if let Some(index) = parser.get_u32_range("TEST_INDEX", 0, u32::MAX) {
            self.test_index = index;
        }
        if let Some(dir) = parser.get_path("LOG_DIR") {
            self.log_dir = dir;
        }
        if let Some(debug) = parser.get_bool("DEBUG") {
            self.debug = debug;
        }
        if let Some(strict) = parser.get_bool("FAIL_BAD_CLUSTER_UTILIZATION") {
            self.fail_bad_cluster_utilization = strict;
        }
        if let Some(deflake) = parser.get_u32_range("DEFLAKE", 1, 100) {
            self.deflake_num = deflake;
        }
        if let Some(forward) = parser.get_bool("FORWARD_LOGS") {
            self.forward_logs = forward;
        }
    }

    /// Check cross-field constraints after every layer has been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver_host.trim().is_empty() {
            return Err(ConfigError::Invalid("driver host must not be empty".into()));
        }
        if self.driver_port == 0 {
            return Err(ConfigError::Invalid("driver port must not be 0".into()));
        }
        if self.test_id.trim().is_empty() {
            return Err(ConfigError::Invalid("test id must not be empty".into()));
        }
        if self.deflake_num == 0 {
            return Err(ConfigError::Invalid(
                "deflake count must be at least 1 (1 disables deflaking)".into(),
            ));
        }
        Ok(())
    }

    /// Whether failed tests are re-executed.
    pub fn deflake_enabled(&self) -> bool {
        self.deflake_num > 1
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn valid() -> RunnerConfig {
        RunnerConfig {
            test_id: "test-1".into(),
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.deflake_num, 1);
        assert!(!config.deflake_enabled());
        assert!(config.forward_logs);
        assert!(!config.fail_bad_cluster_utilization);
    }

    #[test]
    fn test_validate_rejects_zero_deflake() {
        let config = RunnerConfig {
            deflake_num: 0,
            ..valid()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("deflake"));
    }

    #[test]
    fn test_validate_requires_test_id() {
        assert!(RunnerConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "driver_port = 7000\ndeflake_num = 3").unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.driver_port, 7000);
        assert_eq!(config.deflake_num, 3);
        assert!(config.deflake_enabled());
        assert_eq!(config.driver_host, "127.0.0.1");
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "driver_port = \"not a port\"").unwrap();

        let err = RunnerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    #[serial(env)]
    fn test_env_overlays_file() {
        // SAFETY: env mutation is serialized by the `env` test group.
        unsafe {
            std::env::set_var("DTR_DRIVER_PORT", "6001");
            std::env::set_var("DTR_FAIL_BAD_CLUSTER_UTILIZATION", "yes");
        }

        let config = RunnerConfig::load(None);

        unsafe {
            std::env::remove_var("DTR_DRIVER_PORT");
            std::env::remove_var("DTR_FAIL_BAD_CLUSTER_UTILIZATION");
        }

        let config = config.unwrap();
        assert_eq!(config.driver_port, 6001);
        assert!(config.fail_bad_cluster_utilization);
    }

    #[test]
    #[serial(env)]
    fn test_env_errors_are_collected() {
        unsafe {
            std::env::set_var("DTR_DEFLAKE", "0");
            std::env::set_var("DTR_DEBUG", "maybe");
        }

        let result = RunnerConfig::load(None);

        unsafe {
            std::env::remove_var("DTR_DEFLAKE");
            std::env::remove_var("DTR_DEBUG");
        }

        match result {
            Err(ConfigError::Env(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected env errors, got {other:?}"),
        }
    }
}
