//! Teardown of an attempt.
//!
//! Every step is attempted even if an earlier one failed; failures are only
//! logged. A pending process interrupt is the one condition that stops the
//! remaining steps.

use super::RunnerClient;
use super::attempt::InstanceSlot;
use crate::failure::{StepFailure, guarded};
use crate::interrupt::{InterruptFlag, Interrupted};
use crate::test_unit::{TestContext, TestLoader};
use crate::transport::Connector;
use dtr_common::{LogLevel, TestStatus};

/// Outcome of [`run_safely`].
#[derive(Debug)]
pub struct SafeOutcome {
    pub failure: Option<StepFailure>,
    pub interrupted: bool,
}

/// Run `action`, capturing its error or panic, then consume a pending interrupt.
pub fn run_safely(
    interrupt: &InterruptFlag,
    action: impl FnOnce() -> anyhow::Result<()>,
) -> SafeOutcome {
    let failure = guarded(action).err();
    SafeOutcome {
        failure,
        interrupted: interrupt.take(),
    }
}

impl<C: Connector, L: TestLoader> RunnerClient<C, L> {
    pub(super) async fn teardown_test(
        &mut self,
        ctx: &mut TestContext,
        slot: &mut InstanceSlot,
        teardown_services: bool,
        status: TestStatus,
    ) -> Result<(), Interrupted> {
        self.log(LogLevel::Info, "Tearing down...").await;
        let test = match slot {
            InstanceSlot::Ready(test) => test,
            InstanceSlot::Missing => {
                // Nothing was set up; the context itself is closed in FINALIZE.
                let msg = format!("{} failed to instantiate", self.config.test_id);
                self.log(LogLevel::Warn, msg).await;
                return Ok(());
            }
            InstanceSlot::Abandoned => return self.teardown_abandoned(ctx, teardown_services).await,
        };

        if teardown_services {
            self.do_safely("Error running teardown method:", || test.teardown(ctx))
                .await?;
            self.do_safely("Error stopping services:", || ctx.services.stop_all())
                .await?;
        }

        // Logs are collected even when services are left running.
        self.log(LogLevel::Debug, "Copying logs from services...").await;
        self.do_safely("Error copying service logs:", || {
            test.copy_service_logs(ctx, status)
        })
        .await?;

        if teardown_services {
            self.log(LogLevel::Debug, "Cleaning up services...").await;
            self.do_safely("Error cleaning services:", || ctx.services.clean_all())
                .await?;
        }
        Ok(())
    }

    /// Teardown when an interrupted hook still holds the test instance: the
    /// unit's own hooks are out of reach, the registered services are not.
    async fn teardown_abandoned(
        &mut self,
        ctx: &mut TestContext,
        teardown_services: bool,
    ) -> Result<(), Interrupted> {
        let msg = format!(
            "{} did not return after the interrupt, skipping its teardown hooks",
            self.config.test_id
        );
        self.log(LogLevel::Warn, msg).await;
        if teardown_services {
            self.do_safely("Error stopping services:", || ctx.services.stop_all())
                .await?;
            self.log(LogLevel::Debug, "Cleaning up services...").await;
            self.do_safely("Error cleaning services:", || ctx.services.clean_all())
                .await?;
        }
        Ok(())
    }

    /// Run a step whose failure must not escalate; only an interrupt propagates.
    pub(super) async fn do_safely<F>(&mut self, err_msg: &str, action: F) -> Result<(), Interrupted>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let outcome = run_safely(&self.interrupt, action);
        if let Some(failure) = outcome.failure {
            self.log(LogLevel::Warn, format!("{err_msg} {}", failure.message()))
                .await;
        }
        if outcome.interrupted {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}
