//! Lifecycle controller of a runner client process.
//!
//! One [`RunnerClient`] runs exactly one test for the driver:
//!
//! ```text
//! HANDSHAKE -> RESOLVE -> (IGNORED-EXIT | ATTEMPT-LOOP -> FINALIZE) -> DONE
//! ```
//!
//! Test failures never escape the controller; they become FAIL attempts. The
//! only errors [`RunnerClient::run`] returns are an unreachable driver (before
//! the attempt loop), an unresolvable test, or a process interrupt. An
//! interrupt still goes through FINALIZE, so the driver gets a result.

mod attempt;
mod teardown;
pub mod utilization;

pub use teardown::{SafeOutcome, run_safely};

use crate::channel::{ChannelPolicy, ReliableChannel};
use crate::error::RunnerError;
use crate::interrupt::InterruptFlag;
use crate::report::{JsonFileReporter, ResultReporter};
use crate::services::ServiceRegistry;
use crate::summary::aggregate_run_summaries;
use crate::test_unit::{TestContext, TestLoader};
use crate::transport::{Connector, Endpoint, TcpConnector};
use dtr_common::protocol::unix_now;
use dtr_common::{
    ClientEventFactory, ClusterDescriptor, LogLevel, ReadyReply, RunnerConfig, SessionContext,
    TestMetadata, TestResult, TestStatus,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// `test-runner-<pid>-<n>`, unique per client in this process.
fn next_client_id() -> String {
    format!(
        "test-runner-{}-{}",
        std::process::id(),
        NEXT_CLIENT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Lifecycle phase, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshake,
    Resolve,
    IgnoredExit,
    AttemptLoop,
    Finalize,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => write!(f, "handshake"),
            Self::Resolve => write!(f, "resolve"),
            Self::IgnoredExit => write!(f, "ignored-exit"),
            Self::AttemptLoop => write!(f, "attempt-loop"),
            Self::Finalize => write!(f, "finalize"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// What the attempt loop hands to FINALIZE.
struct RunRecord {
    status: TestStatus,
    summaries: Vec<Vec<String>>,
    num_runs: u32,
    data: Option<Value>,
    start_time: f64,
    stop_time: f64,
    all_services: ServiceRegistry,
}

pub struct RunnerClient<C: Connector, L: TestLoader> {
    config: RunnerConfig,
    client_id: String,
    messages: ClientEventFactory,
    channel: ReliableChannel<C>,
    loader: L,
    reporter: Box<dyn ResultReporter>,
    interrupt: InterruptFlag,
    forward_logs: bool,
    test_name: Option<String>,
    phase: Phase,
}

impl<C: Connector, L: TestLoader> RunnerClient<C, L> {
    pub fn new(config: RunnerConfig, connector: C, loader: L, interrupt: InterruptFlag) -> Self {
        let client_id = next_client_id();
        let messages =
            ClientEventFactory::new(config.test_id.clone(), config.test_index, client_id.clone());
        let endpoint = Endpoint::new(config.driver_host.clone(), config.driver_port);
        let channel = ReliableChannel::new(connector, endpoint, messages.clone());
        Self {
            forward_logs: config.forward_logs,
            config,
            client_id,
            messages,
            channel,
            loader,
            reporter: Box::new(JsonFileReporter),
            interrupt,
            test_name: None,
            phase: Phase::Handshake,
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn ResultReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_channel_policy(mut self, policy: ChannelPolicy) -> Self {
        self.channel.set_policy(policy);
        self
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "lifecycle transition");
        self.phase = phase;
    }

    /// HANDSHAKE: register with the driver and receive the test to run.
    pub async fn ready(&mut self) -> Result<ReadyReply, RunnerError> {
        info!(
            client_id = %self.client_id,
            driver = %self.channel.endpoint(),
            test_id = %self.config.test_id,
            test_index = self.config.test_index,
            "registering with driver"
        );
        let reply = self.channel.send(self.messages.ready()).await?;
        serde_json::from_value(reply).map_err(RunnerError::Handshake)
    }

    /// Run the test described by `handshake` and report its result.
    pub async fn run(&mut self, handshake: ReadyReply) -> Result<TestResult, RunnerError> {
        let ReadyReply {
            session_context,
            test_metadata,
            cluster,
        } = handshake;

        self.enter(Phase::Resolve);
        self.log(LogLevel::Info, format!("Loading test {test_metadata}"))
            .await;
        let mut ctx = self.resolve(&test_metadata, Arc::new(session_context), cluster)?;
        self.test_name = Some(ctx.test_name());

        if ctx.ignore() {
            self.enter(Phase::IgnoredExit);
            let result = self.report_ignored(&mut ctx, &test_metadata).await;
            self.enter(Phase::Done);
            return Ok(result);
        }

        self.channel.send(self.messages.running()).await?;

        self.enter(Phase::AttemptLoop);
        let deflake_num = self.config.deflake_num.max(1);
        let mut record = RunRecord {
            status: TestStatus::Fail,
            summaries: Vec::new(),
            num_runs: 0,
            data: None,
            start_time: unix_now(),
            stop_time: unix_now(),
            all_services: ServiceRegistry::new(),
        };
        let mut interrupted = false;

        while record.status == TestStatus::Fail && record.num_runs < deflake_num && !interrupted {
            record.num_runs += 1;
            self.log(
                LogLevel::Info,
                format!("on run {}/{deflake_num}", record.num_runs),
            )
            .await;
            record.start_time = unix_now();

            let outcome = self
                .do_run(&mut ctx, record.num_runs, &mut record.all_services)
                .await;
            interrupted = outcome.interrupted;
            record.status = outcome.status;
            record.data = outcome.data;
            if record.status == TestStatus::Pass && record.num_runs > 1 {
                record.status = TestStatus::Flaky;
            }

            let mut msg = record.status.to_string();
            if !outcome.summary.is_empty() {
                msg.push_str(": ");
                msg.push_str(&outcome.summary.join("\n"));
                record.summaries.push(outcome.summary);
            }
            self.log(LogLevel::Info, msg).await;
        }
        record.stop_time = unix_now();

        self.enter(Phase::Finalize);
        let result = self.finalize(&mut ctx, &test_metadata, record).await;
        self.enter(Phase::Done);

        // A signal that landed after the last attempt checkpoint still counts.
        let interrupted = self.interrupt.take() || interrupted;
        if interrupted {
            warn!(test = %result.test_name, "test run was interrupted");
            return Err(RunnerError::Interrupted);
        }
        Ok(result)
    }

    /// RESOLVE: exactly one test must match the metadata.
    fn resolve(
        &self,
        metadata: &TestMetadata,
        session: Arc<SessionContext>,
        cluster: ClusterDescriptor,
    ) -> Result<TestContext, RunnerError> {
        let mut found = self
            .loader
            .discover(metadata)
            .map_err(|err| RunnerError::Discovery {
                test: metadata.to_string(),
                message: format!("{err:#}"),
            })?;
        if found.len() != 1 {
            return Err(RunnerError::AmbiguousDiscovery {
                test: metadata.to_string(),
                found: found.len(),
            });
        }
        let resolved = found.swap_remove(0);
        Ok(TestContext::new(
            resolved,
            session,
            cluster,
            self.config.test_index,
            self.interrupt.clone(),
        ))
    }

    /// IGNORED-EXIT: report an IGNORE result without executing anything.
    async fn report_ignored(&mut self, ctx: &mut TestContext, metadata: &TestMetadata) -> TestResult {
        let now = unix_now();
        let result = TestResult {
            test_id: self.config.test_id.clone(),
            test_index: self.config.test_index,
            session_id: ctx.session().session_id.clone(),
            test_name: ctx.test_name(),
            status: TestStatus::Ignore,
            summary: String::new(),
            data: None,
            start_time: now,
            stop_time: now,
            services: Vec::new(),
        };
        self.record_result(&result, ctx);
        self.send_finished(&result, metadata).await;
        ctx.close();
        self.channel.close();
        result
    }

    /// FINALIZE: aggregate, apply the utilization policy, report and send the result.
    async fn finalize(
        &mut self,
        ctx: &mut TestContext,
        metadata: &TestMetadata,
        record: RunRecord,
    ) -> TestResult {
        let mut summary = aggregate_run_summaries(
            &record.summaries,
            record.status,
            record.num_runs as usize,
            self.config.deflake_enabled(),
        );

        let verdict = utilization::check_cluster_utilization(
            record.status,
            &ctx.cluster,
            self.config.fail_bad_cluster_utilization,
        );
        if let Some((level, message)) = verdict.log {
            self.log(level, message).await;
        }
        summary.extend(verdict.summary_line);

        if record.num_runs > 1 {
            ctx.attach_services(record.all_services);
        }

        let result = TestResult {
            test_id: self.config.test_id.clone(),
            test_index: self.config.test_index,
            session_id: ctx.session().session_id.clone(),
            test_name: ctx.test_name(),
            status: verdict.status,
            summary: summary.join("\n"),
            data: record.data,
            start_time: record.start_time,
            stop_time: record.stop_time,
            services: ctx.services.service_ids(),
        };

        let data = result
            .data
            .as_ref()
            .map_or_else(|| "None".to_string(), Value::to_string);
        self.log(LogLevel::Info, format!("Data: {data}")).await;

        self.record_result(&result, ctx);
        self.send_finished(&result, metadata).await;
        ctx.close();
        self.channel.close();
        result
    }

    fn record_result(&self, result: &TestResult, ctx: &TestContext) {
        if let Err(err) = self.reporter.report(result, &ctx.results_dir()) {
            warn!(test = %result.test_name, error = %format!("{err:#}"), "failed to record test result");
        }
    }

    /// Sending the final result is best effort: the process ends either way.
    async fn send_finished(&mut self, result: &TestResult, metadata: &TestMetadata) {
        let event = self.messages.finished(result.clone());
        if let Err(err) = self.channel.send(event).await {
            error!(test = %metadata, error = %err, "problem sending FINISHED message");
        }
    }

    /// Log locally and, unless disabled, forward the line to the driver.
    ///
    /// Forwarding is switched off for the rest of the process once the driver
    /// stops answering, so teardown is not stalled by a dead channel.
    async fn log(&mut self, level: LogLevel, msg: impl fmt::Display) {
        let message = match &self.test_name {
            Some(name) => format!("RunnerClient: {name}: {msg}"),
            None => format!("RunnerClient: {msg}"),
        };
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }

        if !self.forward_logs {
            return;
        }
        let event = self.messages.log(message, level);
        if let Err(err) = self.channel.send(event).await {
            error!(error = %err, "failed to forward log line to driver, forwarding disabled");
            self.forward_logs = false;
        }
    }
}

/// Connect to the configured driver over TCP and run one test.
pub async fn run_client<L: TestLoader>(
    config: RunnerConfig,
    loader: L,
    interrupt: InterruptFlag,
) -> Result<TestResult, RunnerError> {
    let mut client = RunnerClient::new(config, TcpConnector, loader, interrupt);
    let handshake = client.ready().await?;
    client.run(handshake).await
}
