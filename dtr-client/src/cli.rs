//! Command-line flags of `dtr-client run`.
//!
//! Flags are the highest-precedence configuration layer: they are applied on
//! top of [`RunnerConfig::load`] (defaults, TOML file, `DTR_*` variables).

use clap::Args;
use dtr_common::{ConfigError, RunnerConfig};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Args)]
pub struct RunnerArgs {
    /// Driver host
    #[arg(long)]
    pub driver_host: Option<String>,

    /// Driver port
    #[arg(long)]
    pub driver_port: Option<u16>,

    /// Driver-assigned test id
    #[arg(long)]
    pub test_id: Option<String>,

    /// Index of this run within the driver session
    #[arg(long)]
    pub test_index: Option<u32>,

    /// Directory for this process's log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Fail passing tests that use fewer nodes than they requested
    #[arg(long)]
    pub fail_bad_cluster_utilization: bool,

    /// Run a failing test up to N times (1 disables deflaking)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=100))]
    pub deflake: Option<u32>,

    /// Do not mirror controller log lines to the driver
    #[arg(long)]
    pub no_forward_logs: bool,

    /// TOML configuration file
    #[arg(long, env = "DTR_CONFIG")]
    pub config: Option<PathBuf>,
}

impl RunnerArgs {
    /// Overlay the flags that were given.
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(host) = &self.driver_host {
            config.driver_host = host.clone();
        }
        if let Some(port) = self.driver_port {
            config.driver_port = port;
        }
        if let Some(test_id) = &self.test_id {
            config.test_id = test_id.clone();
        }
        if let Some(index) = self.test_index {
            config.test_index = index;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(deflake) = self.deflake {
            config.deflake_num = deflake;
        }
        config.debug |= self.debug;
        config.fail_bad_cluster_utilization |= self.fail_bad_cluster_utilization;
        if self.no_forward_logs {
            config.forward_logs = false;
        }
    }

    /// Assemble and validate the full configuration.
    pub fn resolve(&self) -> Result<RunnerConfig, ConfigError> {
        let mut config = RunnerConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// `<log dir>/<test id>-<test index>.log`, with path separators in the id replaced.
pub fn log_file_path(config: &RunnerConfig) -> PathBuf {
    let test_id: String = config
        .test_id
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    config
        .log_dir
        .join(format!("{test_id}-{}.log", config.test_index))
}
