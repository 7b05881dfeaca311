//! In-memory driver for exercising the client without sockets.
//!
//! [`MockDriver`] records every event it receives and answers according to a
//! script of [`MockResponse`]s, one per transmission. Once the script runs
//! out it replies normally: the handshake payload to `ready` and an
//! acknowledgement to everything else.

use crate::transport::{Connection, Connector, Endpoint};
use dtr_common::{ClientEvent, EventKind, ReadyReply, SerDe};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// What the mock driver does with one received transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Answer normally.
    Reply,
    /// Answer with a zero-length frame.
    Empty,
    /// Never answer.
    Silent,
    /// Fail the send with a transport error.
    Error,
    /// Answer with these exact bytes.
    Raw(Vec<u8>),
}

#[derive(Debug, Default)]
struct MockDriverState {
    ready_reply: Option<Value>,
    script: VecDeque<MockResponse>,
    received: Vec<ClientEvent>,
    refuse_connects: usize,
    connect_attempts: usize,
    connects: usize,
    closes: usize,
}

/// Shared handle to a scripted in-memory driver.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that answers `ready` with `reply`.
    pub fn with_ready_reply(reply: &ReadyReply) -> Self {
        let driver = Self::new();
        driver.lock().ready_reply = serde_json::to_value(reply).ok();
        driver
    }

    fn lock(&self) -> MutexGuard<'_, MockDriverState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue responses for the next transmissions.
    pub fn script(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.lock().script.extend(responses);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.lock().refuse_connects = count;
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            driver: self.clone(),
        }
    }

    /// Every event received so far, in arrival order.
    pub fn received(&self) -> Vec<ClientEvent> {
        self.lock().received.clone()
    }

    /// Kinds of the received events, in arrival order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.lock().received.iter().map(ClientEvent::kind).collect()
    }

    /// Received events, excluding forwarded log lines.
    pub fn lifecycle_kinds(&self) -> Vec<EventKind> {
        self.kinds()
            .into_iter()
            .filter(|kind| *kind != EventKind::Log)
            .collect()
    }

    /// Messages of the received `log` events.
    pub fn log_messages(&self) -> Vec<String> {
        self.lock()
            .received
            .iter()
            .filter_map(|event| match &event.body {
                dtr_common::EventBody::Log { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Record an event and decide the response; `None` means stay silent.
    fn handle(&self, frame: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let event: ClientEvent = SerDe::new()
            .deserialize(frame)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut state = self.lock();
        let kind = event.kind();
        state.received.push(event);

        let response = state.script.pop_front().unwrap_or(MockResponse::Reply);
        match response {
            MockResponse::Reply => {
                let reply = match (kind, &state.ready_reply) {
                    (EventKind::Ready, Some(reply)) => reply.clone(),
                    (EventKind::Ready, None) => json!({}),
                    _ => json!({ "ack": true }),
                };
                Ok(Some(reply.to_string().into_bytes()))
            }
            MockResponse::Empty => Ok(Some(Vec::new())),
            MockResponse::Silent => Ok(None),
            MockResponse::Error => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "mock driver reset the connection",
            )),
            MockResponse::Raw(bytes) => Ok(Some(bytes)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    driver: MockDriver,
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<MockConnection> {
        let mut state = self.driver.lock();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock driver refused the connection",
            ));
        }
        state.connects += 1;
        Ok(MockConnection {
            driver: self.driver.clone(),
            pending: None,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    driver: MockDriver,
    pending: Option<Vec<u8>>,
}

impl Connection for MockConnection {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.pending = self.driver.handle(frame)?;
        Ok(())
    }

    async fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        match self.pending.take() {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }

    fn close(self) {
        self.driver.lock().closes += 1;
    }
}
