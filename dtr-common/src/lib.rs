//! Shared types and utilities for the distributed test runner.
//!
//! The runner client (`dtr-client`) and any driver implementation agree on the
//! types in this crate: the protocol events exchanged over the request/reply
//! channel, the handshake payload, the final test result, and the wire codec.
//! Process bootstrap concerns (configuration and logging) live here as well so
//! that every binary in the workspace configures itself the same way.

pub mod codec;
pub mod config;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod testing;
pub mod types;

pub use codec::SerDe;
pub use config::{ConfigError, EnvError, EnvParser, RunnerConfig};
pub use errors::ProtocolError;
pub use logging::{LogConfig, LoggingError, LoggingGuards, init_logging};
pub use protocol::{ClientEvent, ClientEventFactory, EventBody, EventKind, LogLevel, ReadyReply};
pub use types::{
    ClusterDescriptor, ClusterError, NodeSpec, SessionContext, TestMetadata, TestResult,
    TestStatus,
};
