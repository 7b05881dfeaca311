//! End-to-end runs over a real TCP socket against the built-in tests.

mod common;

use common::{TcpFakeDriver, ready_reply, runner_config};
use dtr_client::cli::RunnerArgs;
use dtr_client::{InterruptFlag, run_client, selftest};
use dtr_common::{EventBody, EventKind, ReadyReply, RunnerConfig, TestStatus};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn selftest_reply(results_dir: &Path, nodes: usize, method: &str) -> ReadyReply {
    let mut reply = ready_reply(results_dir, nodes, method);
    reply.test_metadata.file_name = format!("{}.rs", selftest::MODULE);
    reply.test_metadata.cls_name = selftest::CLASS.into();
    reply
}

fn config_for(driver: &TcpFakeDriver) -> RunnerConfig {
    RunnerConfig {
        driver_port: driver.port,
        ..runner_config(1, true)
    }
}

#[tokio::test]
async fn test_cluster_selftest_over_tcp() {
    crate::test_log!("TEST START: test_cluster_selftest_over_tcp");
    let dir = TempDir::new().unwrap();
    let driver = TcpFakeDriver::start(selftest_reply(dir.path(), 3, "test_cluster"), false).await;

    let result = run_client(config_for(&driver), selftest::registry(), InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Pass);
    assert_eq!(result.test_name, "selftest.SelfCheck.test_cluster");
    assert_eq!(
        result.data,
        Some(serde_json::json!({ "nodes": ["worker0", "worker1", "worker2"] }))
    );
    assert_eq!(
        driver.lifecycle_kinds(),
        [EventKind::Ready, EventKind::Running, EventKind::Finished]
    );

    let test_dir = dir.path().join("selftest.SelfCheck.test_cluster").join("1");
    assert!(test_dir.join("nodes.json").exists());
    assert!(test_dir.join("report.json").exists());

    let finished = driver
        .events()
        .into_iter()
        .find_map(|event| match event.body {
            EventBody::Finished { result } => Some(*result),
            _ => None,
        })
        .unwrap();
    assert_eq!(finished, result);
    crate::test_log!("TEST PASS: test_cluster_selftest_over_tcp");
}

#[tokio::test]
async fn test_dropped_connection_is_retried_with_new_id() {
    crate::test_log!("TEST START: test_dropped_connection_is_retried_with_new_id");
    let dir = TempDir::new().unwrap();
    let driver = TcpFakeDriver::start(selftest_reply(dir.path(), 1, "test_noop"), true).await;

    let result = run_client(config_for(&driver), selftest::registry(), InterruptFlag::new())
        .await
        .unwrap();
    assert_eq!(result.status, TestStatus::Pass);

    let events = driver.events();
    assert_eq!(events[0].kind(), EventKind::Ready);
    assert_eq!(events[1].kind(), EventKind::Ready);
    assert_ne!(events[0].message_id, events[1].message_id);
    assert_eq!(driver.lifecycle_kinds().last(), Some(&EventKind::Finished));
}

#[tokio::test]
async fn test_injected_args_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut reply = selftest_reply(dir.path(), 1, "test_echo_args");
    reply.test_metadata.injected_args = Some(serde_json::json!({ "broker_version": "3.7" }));
    let driver = TcpFakeDriver::start(reply, false).await;

    let result = run_client(config_for(&driver), selftest::registry(), InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(result.status, TestStatus::Pass);
    assert_eq!(result.data, Some(serde_json::json!({ "broker_version": "3.7" })));
}

#[test]
fn test_flags_override_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "driver_port = 7100\ntest_id = \"from-file\"\ndeflake_num = 2\nforward_logs = false"
    )
    .unwrap();

    let args = RunnerArgs {
        config: Some(file.path().to_path_buf()),
        test_id: Some("from-flag".into()),
        ..RunnerArgs::default()
    };
    let config = args.resolve().unwrap();

    assert_eq!(config.driver_port, 7100);
    assert_eq!(config.test_id, "from-flag");
    assert_eq!(config.deflake_num, 2);
    assert!(!config.forward_logs);
}
