#![allow(dead_code)]

pub mod fixtures;
pub mod logging;

pub use fixtures::{Gate, Journal, Scenario, TcpFakeDriver, fast_policy, ready_reply, runner_config, scenario_registry};
pub use logging::init_test_logging;
