//! Errors that end the runner client's lifecycle.
//!
//! Failures of the test itself never surface here: they become FAIL results.
//! A [`RunnerError`] means the client could not run the test or could not
//! talk to the driver.

use crate::channel::ChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The driver could not be reached.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The reply to `ready` did not carry a usable handshake payload.
    #[error("invalid handshake reply from driver: {0}")]
    Handshake(#[source] serde_json::Error),

    /// The loader failed while resolving the test.
    #[error("failed to discover test {test}: {message}")]
    Discovery { test: String, message: String },

    /// Discovery did not resolve to exactly one test.
    #[error("expected exactly one test for {test}, discovery found {found}")]
    AmbiguousDiscovery { test: String, found: usize },

    /// A process interrupt was received; the result was still reported.
    #[error("test run interrupted by signal")]
    Interrupted,
}

impl RunnerError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => crate::interrupt::FORCED_EXIT_STATUS,
            _ => 1,
        }
    }
}
