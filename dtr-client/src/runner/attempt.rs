//! One attempt of the test: instantiate, set up, run, tear down, free nodes.
//!
//! Setup and the test body run on the blocking pool and race the process
//! interrupt. When the interrupt wins, the hook's thread is abandoned along
//! with the test instance, and the attempt continues into teardown with the
//! services the hook had registered.

use super::RunnerClient;
use crate::failure::{StepFailure, guarded};
use crate::services::{ServiceIdFactory, ServiceRegistry};
use crate::test_unit::{TestContext, TestInstance, TestLoader};
use crate::transport::Connector;
use anyhow::Context;
use dtr_common::{LogLevel, TestStatus};
use serde_json::Value;
use tracing::warn;

/// Result of one attempt.
#[derive(Debug)]
pub(super) struct AttemptOutcome {
    pub status: TestStatus,
    pub summary: Vec<String>,
    pub data: Option<Value>,
    pub interrupted: bool,
}

/// The attempt's test instance.
pub(super) enum InstanceSlot {
    /// Instantiation did not succeed.
    Missing,
    Ready(Box<dyn TestInstance>),
    /// Still owned by a hook that did not return before an interrupt.
    Abandoned,
}

impl<C: Connector, L: TestLoader> RunnerClient<C, L> {
    pub(super) async fn do_run(
        &mut self,
        ctx: &mut TestContext,
        run: u32,
        all_services: &mut ServiceRegistry,
    ) -> AttemptOutcome {
        let id_factory = ServiceIdFactory::for_run(run, self.config.deflake_enabled());
        ctx.begin_attempt();

        let mut test = InstanceSlot::Missing;
        let mut summary = Vec::new();
        let mut interrupted = false;
        let (status, data) = match self.execute(ctx, &mut test).await {
            Ok(data) => (TestStatus::Pass, data),
            Err(failure) => {
                interrupted = failure.interrupted;
                summary.extend(failure.lines);
                (TestStatus::Fail, None)
            }
        };

        // Runs whatever happened above.
        ctx.services.assign_id_factory(id_factory);
        all_services.extend_from(&ctx.services);

        let teardown_services = !ctx.session().no_teardown;
        if self
            .teardown_test(ctx, &mut test, teardown_services, status)
            .await
            .is_err()
        {
            interrupted = true;
        }

        let service_errors = ctx.services.errors();
        if !service_errors.is_empty() {
            summary.extend([String::new(), String::new()]);
            summary.extend(service_errors.lines().map(str::to_string));
        }

        match &mut test {
            InstanceSlot::Ready(test) => {
                self.log(LogLevel::Debug, "Freeing nodes...").await;
                if self
                    .do_safely("Error freeing nodes:", || test.free_nodes(ctx))
                    .await
                    .is_err()
                {
                    interrupted = true;
                }
            }
            InstanceSlot::Abandoned => {
                let msg = "Not freeing nodes: the test instance is still held by an interrupted hook";
                self.log(LogLevel::Warn, msg).await;
            }
            InstanceSlot::Missing => {}
        }

        AttemptOutcome {
            status,
            summary,
            data,
            interrupted,
        }
    }

    async fn execute(
        &mut self,
        ctx: &mut TestContext,
        test: &mut InstanceSlot,
    ) -> Result<Option<Value>, StepFailure> {
        let results_dir = ctx.results_dir();
        self.checkpoint(guarded(|| {
            std::fs::create_dir_all(&results_dir)
                .with_context(|| format!("failed to create {}", results_dir.display()))
        }))?;

        let instance = self.checkpoint(guarded(|| ctx.instantiate()))?;
        *test = InstanceSlot::Ready(instance);

        self.log(LogLevel::Info, "Setting up...").await;
        self.run_hook(ctx, test, |unit, ctx| unit.setup(ctx)).await?;

        self.log(LogLevel::Info, "Running...").await;
        self.run_hook(ctx, test, |unit, ctx| unit.run(ctx)).await
    }

    /// Run a blocking test hook on the blocking pool, racing the process interrupt.
    ///
    /// Instance and context move to the hook's thread and come back when it
    /// returns. If the interrupt wins, the slot is left [`InstanceSlot::Abandoned`]
    /// and `ctx` is the stand-in from [`TestContext::detach`].
    async fn run_hook<T, F>(
        &mut self,
        ctx: &mut TestContext,
        slot: &mut InstanceSlot,
        hook: F,
    ) -> Result<T, StepFailure>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn TestInstance>, &mut TestContext) -> anyhow::Result<T>
            + Send
            + 'static,
    {
        let mut instance = match std::mem::replace(slot, InstanceSlot::Abandoned) {
            InstanceSlot::Ready(instance) => instance,
            other => {
                *slot = other;
                return Err(StepFailure::from_error(&anyhow::anyhow!(
                    "test instance is not available"
                )));
            }
        };
        let mut owned = ctx.detach();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = guarded(|| hook(&mut instance, &mut owned));
            (instance, owned, outcome)
        });

        let interrupt = self.interrupt.clone();
        tokio::select! {
            biased;
            joined = task => match joined {
                Ok((instance, owned, outcome)) => {
                    *slot = InstanceSlot::Ready(instance);
                    *ctx = owned;
                    self.checkpoint(outcome)
                }
                // Panics are caught inside the task; only a runtime shutdown lands here.
                Err(err) => Err(StepFailure::from_error(
                    &anyhow::Error::new(err).context("test hook did not complete"),
                )),
            },
            () = interrupt.wait() => {
                self.interrupt.take();
                warn!(test = %ctx.test_name(), "interrupted while a test hook was running, abandoning it");
                Err(StepFailure::interrupted())
            }
        }
    }

    /// Consume a pending interrupt after a step.
    fn checkpoint<T>(&self, outcome: Result<T, StepFailure>) -> Result<T, StepFailure> {
        let interrupted = self.interrupt.take();
        match outcome {
            Err(mut failure) => {
                failure.interrupted |= interrupted;
                Err(failure)
            }
            Ok(_) if interrupted => Err(StepFailure::interrupted()),
            Ok(value) => Ok(value),
        }
    }
}
