//! Distributed Test Runner - Runner Client
//!
//! Launched by the driver once per test. Runs the test it is handed and
//! reports the result back over the driver's request/reply endpoint.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dtr_client::cli::{RunnerArgs, log_file_path};
use dtr_client::{InterruptFlag, run_client, selftest};
use dtr_common::{LogConfig, init_logging};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dtr-client")]
#[command(author, version, about = "Distributed test runner - per-test runner client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one test for the driver
    Run(RunnerArgs),

    /// Respond to health check
    Health,

    /// List the tests compiled into this binary
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args, cli.verbose).await,
        Commands::Health => {
            println!("OK");
            Ok(())
        }
        Commands::List => {
            for name in selftest::registry().names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

async fn run(args: RunnerArgs, verbose: bool) -> Result<()> {
    let config = args.resolve().context("invalid runner configuration")?;

    let interrupt = InterruptFlag::new();
    interrupt
        .install_signal_handlers()
        .context("failed to install signal handlers")?;

    let mut log_config = LogConfig::from_env("info")
        .with_stderr()
        .with_file(log_file_path(&config));
    if verbose || config.debug {
        log_config = log_config.with_level("debug");
    }
    let logging_guards = init_logging(&log_config)?;

    match run_client(config, selftest::registry(), interrupt).await {
        Ok(result) => {
            info!(
                test = %result.test_name,
                status = %result.status,
                "test complete"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "runner client failed");
            let code = err.exit_code();
            // Flush the log file before exiting.
            drop(logging_guards);
            std::process::exit(code);
        }
    }
}
