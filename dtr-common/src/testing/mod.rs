//! Test helpers shared by the workspace's unit and integration tests.

pub mod log;

pub use log::{init_test_logging, test_log_path};
