//! Runner client / driver protocol definitions.
//!
//! Every request the client sends is a [`ClientEvent`]: a unique message id,
//! the identifiers of the test and the sending process, and a kind-specific
//! body. The driver answers each request with exactly one reply; the reply to
//! `ready` is a [`ReadyReply`], every other reply is an acknowledgement whose
//! content the client does not interpret.
//!
//! Message ids are unique per *physical* send. When the channel retransmits a
//! request it first asks [`ClientEventFactory::copy`] for a duplicate with a
//! fresh id, which is what lets the driver tell a retransmission apart from a
//! request it has already answered.

use crate::types::{ClusterDescriptor, SessionContext, TestMetadata, TestResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical kind of a protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    Running,
    Log,
    Finished,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Log => write!(f, "log"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Severity carried by a forwarded `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Kind-specific content of a [`ClientEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventBody {
    /// Registration; the reply carries the handshake payload.
    Ready,
    /// The test is about to execute its attempts.
    Running,
    /// A log line to be recorded on the driver side.
    Log { level: LogLevel, message: String },
    /// The final result of the test.
    Finished { result: Box<TestResult> },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::Running => EventKind::Running,
            Self::Log { .. } => EventKind::Log,
            Self::Finished { .. } => EventKind::Finished,
        }
    }
}

/// A request from the runner client to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    /// Unique per physical send.
    pub message_id: Uuid,
    /// Driver-assigned test identifier.
    pub test_id: String,
    /// Index of this run within the driver session.
    pub test_index: u32,
    /// Identifier of the sending runner client process.
    pub source_id: String,
    /// Unix timestamp (seconds) at which the event was created.
    pub event_time: f64,
    #[serde(flatten)]
    pub body: EventBody,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

/// Reply to a `ready` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyReply {
    pub session_context: SessionContext,
    pub test_metadata: TestMetadata,
    pub cluster: ClusterDescriptor,
}

/// Builds [`ClientEvent`]s tagged with this process's test and sender ids.
#[derive(Debug, Clone)]
pub struct ClientEventFactory {
    test_id: String,
    test_index: u32,
    source_id: String,
}

impl ClientEventFactory {
    pub fn new(test_id: impl Into<String>, test_index: u32, source_id: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            test_index,
            source_id: source_id.into(),
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn test_index(&self) -> u32 {
        self.test_index
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    fn event(&self, body: EventBody) -> ClientEvent {
        ClientEvent {
            message_id: Uuid::new_v4(),
            test_id: self.test_id.clone(),
            test_index: self.test_index,
            source_id: self.source_id.clone(),
            event_time: unix_now(),
            body,
        }
    }

    pub fn ready(&self) -> ClientEvent {
        self.event(EventBody::Ready)
    }

    pub fn running(&self) -> ClientEvent {
        self.event(EventBody::Running)
    }

    pub fn log(&self, message: impl Into<String>, level: LogLevel) -> ClientEvent {
        self.event(EventBody::Log {
            level,
            message: message.into(),
        })
    }

    pub fn finished(&self, result: TestResult) -> ClientEvent {
        self.event(EventBody::Finished {
            result: Box::new(result),
        })
    }

    /// Duplicate `event` with a fresh message id; everything else is preserved.
    pub fn copy(&self, event: &ClientEvent) -> ClientEvent {
        ClientEvent {
            message_id: Uuid::new_v4(),
            ..event.clone()
        }
    }
}

/// Current time as fractional Unix seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
