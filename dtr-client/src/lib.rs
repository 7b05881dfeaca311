//! Runner client of the distributed test runner.
//!
//! The driver launches one `dtr-client` process per test. The process
//! registers with the driver, resolves the test it was handed, runs it (with
//! optional deflake retries), tears it down, and reports a single final
//! result. All driver communication goes through [`channel::ReliableChannel`],
//! which bounds every request with a timeout and a retransmission budget.

pub mod channel;
pub mod cli;
pub mod error;
pub mod failure;
pub mod interrupt;
pub mod mock;
pub mod report;
pub mod runner;
pub mod selftest;
pub mod services;
pub mod summary;
pub mod test_unit;
pub mod transport;

pub use channel::{ChannelError, ChannelPolicy, ReliableChannel};
pub use error::RunnerError;
pub use interrupt::{InterruptFlag, Interrupted};
pub use report::{JsonFileReporter, ResultReporter};
pub use runner::{RunnerClient, run_client};
pub use services::{Service, ServiceHandle, ServiceIdFactory, ServiceRegistry};
pub use test_unit::{ResolvedTest, TestContext, TestInstance, TestLoader, TestRegistry, TestUnit};
pub use transport::{Connection, Connector, Endpoint, TcpConnector};
