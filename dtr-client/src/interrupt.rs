//! Process-interrupt signalling.
//!
//! SIGINT and SIGTERM raise a flag and wake every task waiting in
//! [`InterruptFlag::wait`]. The controller consumes the flag at its
//! checkpoints (after instantiation, setup, the body and each teardown step)
//! and races blocking test hooks against the wakeup, so that an interrupted
//! test still tears down, frees its nodes and reports a result.
//! A second signal while the flag is still raised terminates the process.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Notify;

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::iterator::Signals;

/// Exit status used when a second signal arrives before the first was handled.
pub const FORCED_EXIT_STATUS: i32 = 130;

/// Raised by a checkpoint that consumed a pending interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted by signal")]
pub struct Interrupted;

/// Shared interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM to this flag.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM] {
            // Order matters: the shutdown check must run before the flag is set.
            flag::register_conditional_shutdown(
                signal,
                FORCED_EXIT_STATUS,
                Arc::clone(&self.raised),
            )?;
            flag::register(signal, Arc::clone(&self.raised))?;
        }

        // The flag is already set when this thread observes the signal.
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let notify = Arc::clone(&self.notify);
        std::thread::Builder::new()
            .name("dtr-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    tracing::warn!(signal, "interrupt requested");
                    notify.notify_waiters();
                }
            })?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        Ok(())
    }

    /// Raise the flag as if a signal had arrived.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Resolve once the flag is raised, without consuming it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before reading the flag so a raise in between is not lost.
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
