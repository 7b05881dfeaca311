use dtr_client::transport::{read_frame, write_frame};
use dtr_client::{ChannelPolicy, InterruptFlag, Service, TestContext, TestRegistry, TestUnit};
use dtr_common::{
    ClientEvent, ClusterDescriptor, EventKind, NodeSpec, ReadyReply, RunnerConfig, SessionContext,
    TestMetadata, TestStatus,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const MODULE: &str = "scenario_test";
pub const CLASS: &str = "Scenario";
pub const METHOD: &str = "test_body";
pub const TEST_NAME: &str = "scenario_test.Scenario.test_body";

/// Ordered record of the hooks the scenario went through.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }
}

/// A latch a blocking test body waits on until the test opens it.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (opened, cvar) = &*self.0;
        *opened.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Block until opened or `limit` elapses.
    pub fn wait(&self, limit: Duration) {
        let (opened, cvar) = &*self.0;
        let guard = opened.lock().unwrap();
        let _ = cvar.wait_timeout_while(guard, limit, |opened| !*opened).unwrap();
    }
}

/// Where a scenario raises the process interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptAt {
    Body,
    Teardown,
}

/// Behavior of the scenario test; every attempt reads the same settings.
#[derive(Clone, Default)]
pub struct Scenario {
    /// 1-based attempts whose body fails.
    pub fail_attempts: Vec<u32>,
    pub fail_instantiation: bool,
    pub fail_teardown: bool,
    pub panic_in_body: bool,
    /// Nodes leased during setup.
    pub nodes_to_use: usize,
    /// Start a `zk` service during setup.
    pub with_service: bool,
    /// Errors reported by the `zk` service.
    pub service_errors: Option<String>,
    pub interrupt_at: Option<(InterruptAt, InterruptFlag)>,
    /// The body blocks on this gate, ignoring interrupts.
    pub block_body: Option<Gate>,
}

struct FakeService {
    journal: Journal,
    errors: Option<String>,
}

impl Service for FakeService {
    fn name(&self) -> &str {
        "zk"
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.journal.record("stop:zk");
        Ok(())
    }

    fn clean(&mut self) -> anyhow::Result<()> {
        self.journal.record("clean:zk");
        Ok(())
    }

    fn errors(&self) -> Option<String> {
        self.errors.clone()
    }
}

struct ScenarioUnit {
    scenario: Arc<Scenario>,
    journal: Journal,
    attempt: u32,
    leased: Vec<NodeSpec>,
}

impl ScenarioUnit {
    fn raise_if(&self, at: InterruptAt) {
        if let Some((when, flag)) = &self.scenario.interrupt_at {
            if *when == at {
                flag.raise();
            }
        }
    }

    fn test_body(&mut self, _ctx: &mut TestContext) -> anyhow::Result<Option<Value>> {
        self.journal.record("body");
        self.raise_if(InterruptAt::Body);
        if let Some(gate) = &self.scenario.block_body {
            gate.wait(Duration::from_secs(10));
            self.journal.record("body_released");
        }
        if self.scenario.panic_in_body {
            panic!("body panicked");
        }
        if self.scenario.fail_attempts.contains(&self.attempt) {
            anyhow::bail!("assertion failed");
        }
        Ok(Some(json!({ "attempt": self.attempt })))
    }
}

impl TestUnit for ScenarioUnit {
    fn setup(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        self.journal.record("setup");
        if self.scenario.with_service {
            ctx.register_service(FakeService {
                journal: self.journal.clone(),
                errors: self.scenario.service_errors.clone(),
            });
        }
        self.leased = ctx.cluster.alloc(self.scenario.nodes_to_use)?;
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut TestContext) -> anyhow::Result<()> {
        self.journal.record("teardown");
        self.raise_if(InterruptAt::Teardown);
        if self.scenario.fail_teardown {
            anyhow::bail!("teardown failed");
        }
        Ok(())
    }

    fn copy_service_logs(&mut self, _ctx: &mut TestContext, status: TestStatus) -> anyhow::Result<()> {
        self.journal.record(format!("copy_logs:{status}"));
        Ok(())
    }

    fn free_nodes(&mut self, ctx: &mut TestContext) -> anyhow::Result<()> {
        self.journal.record("free_nodes");
        ctx.cluster.free(&self.leased)?;
        self.leased.clear();
        Ok(())
    }
}

/// Registry holding the single scenario test.
pub fn scenario_registry(scenario: Scenario, journal: Journal) -> TestRegistry {
    let scenario = Arc::new(scenario);
    let attempts = Arc::new(AtomicU32::new(0));
    let mut registry = TestRegistry::new();
    registry.register(
        MODULE,
        CLASS,
        METHOD,
        move |_ctx| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            journal.record("instantiate");
            if scenario.fail_instantiation {
                anyhow::bail!("constructor failed");
            }
            Ok(ScenarioUnit {
                scenario: Arc::clone(&scenario),
                journal: journal.clone(),
                attempt,
                leased: Vec::new(),
            })
        },
        ScenarioUnit::test_body,
    );
    registry
}

pub fn ready_reply(results_dir: &Path, nodes: usize, method: &str) -> ReadyReply {
    ReadyReply {
        session_context: SessionContext {
            session_id: "session-1".into(),
            results_dir: results_dir.to_path_buf(),
            no_teardown: false,
            debug: false,
            globals: Default::default(),
        },
        test_metadata: TestMetadata {
            directory: "tests".into(),
            file_name: format!("{MODULE}.rs"),
            cls_name: CLASS.into(),
            method_name: method.into(),
            injected_args: None,
        },
        cluster: ClusterDescriptor::new(
            (0..nodes).map(|i| NodeSpec::new(format!("worker{i}"))).collect(),
        ),
    }
}

pub fn runner_config(deflake_num: u32, forward_logs: bool) -> RunnerConfig {
    RunnerConfig {
        test_id: "test-42".into(),
        test_index: 1,
        deflake_num,
        forward_logs,
        ..RunnerConfig::default()
    }
}

pub fn fast_policy() -> ChannelPolicy {
    ChannelPolicy {
        request_timeout: Duration::from_millis(50),
        max_transmissions: 5,
    }
}

/// A driver listening on a real TCP socket.
pub struct TcpFakeDriver {
    pub port: u16,
    events: Arc<Mutex<Vec<ClientEvent>>>,
    task: JoinHandle<()>,
}

impl TcpFakeDriver {
    /// Serve connections one at a time. With `drop_first`, the very first
    /// request is read and its connection closed without a reply.
    pub async fn start(ready: ReadyReply, drop_first: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let events = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&events);
        let ready = serde_json::to_vec(&ready).unwrap();

        let task = tokio::spawn(async move {
            let mut dropped = !drop_first;
            while let Ok((mut stream, _)) = listener.accept().await {
                while let Ok(frame) = read_frame(&mut stream).await {
                    let event: ClientEvent = serde_json::from_slice(&frame).unwrap();
                    let kind = event.kind();
                    recorded.lock().unwrap().push(event);
                    if !dropped {
                        dropped = true;
                        break;
                    }
                    let reply = match kind {
                        EventKind::Ready => ready.clone(),
                        _ => br#"{"ack":true}"#.to_vec(),
                    };
                    if write_frame(&mut stream, &reply).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self { port, events, task }
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn lifecycle_kinds(&self) -> Vec<EventKind> {
        self.events()
            .iter()
            .map(ClientEvent::kind)
            .filter(|kind| *kind != EventKind::Log)
            .collect()
    }
}

impl Drop for TcpFakeDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
