//! Structured test logging for CI debugging.
//!
//! Tests call [`init_test_logging`] (directly, or once from a `#[ctor::ctor]`
//! setup function) to route `tracing` output through the test writer and,
//! additionally, into a JSONL file under `target/test-logs/` so failed CI runs
//! can be inspected after the fact.
//!
//! # Environment Variables
//!
//! - `DTR_TEST_LOG_FILE`: Override the JSONL file path
//! - `DTR_TEST_LOG_LEVEL`: Set log level filter (default: `info`)

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static TEST_LOGGING_INIT: Once = Once::new();

/// Initialize logging for tests. Safe to call multiple times.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let file_layer = create_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level = std::env::var("DTR_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "dtr_client={level},dtr_common={level},test={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Path of the aggregated JSONL test log.
pub fn test_log_path() -> PathBuf {
    if let Ok(custom_path) = std::env::var("DTR_TEST_LOG_FILE") {
        return PathBuf::from(custom_path);
    }
    find_target_dir().join("test-logs").join("all_tests.jsonl")
}

fn create_log_file() -> Option<std::fs::File> {
    open_log_file(&test_log_path())
}

/// Open for appending: every test binary of a run writes into the same file.
fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}

/// Find the target directory by searching up from current dir.
fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}
