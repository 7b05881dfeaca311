//! Reliable request/reply channel to the driver.
//!
//! [`ReliableChannel::send`] blocks the caller until the driver answers or the
//! transmission budget is spent. Each physical transmission consumes one
//! credit, whatever its outcome:
//!
//! - non-empty reply: decoded and returned
//! - empty reply: the connection is kept and the request is retransmitted
//! - timeout, transport error or failed connect: the connection is dropped
//!   with zero linger and a new one is opened for the next transmission
//!
//! Every retransmission carries a fresh message id (see
//! [`ClientEventFactory::copy`]). Running out of credits is fatal: without a
//! channel the client cannot report anything.

use crate::transport::{Connection, Connector, Endpoint};
use dtr_common::{ClientEvent, ClientEventFactory, ProtocolError, SerDe};
use serde_json::Value;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to wait for a reply before treating the connection as desynchronized.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Physical transmissions allowed per logical send.
pub const NUM_RETRIES: u32 = 5;

/// Retry policy of the channel.
#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    /// Deadline for one transmission (connect, send and reply).
    pub request_timeout: Duration,
    /// Transmissions allowed per logical send (minimum 1).
    pub max_transmissions: u32,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            max_transmissions: NUM_RETRIES,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// No usable reply after spending every credit.
    #[error("unable to receive response from driver at {endpoint} after {transmissions} transmissions")]
    Exhausted {
        endpoint: String,
        transmissions: u32,
    },

    /// The event or the reply could not be (de)serialized.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result of one physical transmission.
enum Exchange {
    Reply(Vec<u8>),
    Empty,
    TimedOut,
    Failed(io::Error),
    ConnectFailed(io::Error),
}

pub struct ReliableChannel<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    policy: ChannelPolicy,
    serde: SerDe,
    messages: ClientEventFactory,
    connection: Option<C::Connection>,
}

impl<C: Connector> ReliableChannel<C> {
    /// Create a channel; the first connection is opened lazily by the first send.
    pub fn new(connector: C, endpoint: Endpoint, messages: ClientEventFactory) -> Self {
        Self {
            connector,
            endpoint,
            policy: ChannelPolicy::default(),
            serde: SerDe::new(),
            messages,
            connection: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.set_policy(policy);
        self
    }

    pub fn set_policy(&mut self, policy: ChannelPolicy) {
        self.policy = policy;
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &ChannelPolicy {
        &self.policy
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send `event` and wait for the driver's reply.
    pub async fn send(&mut self, event: ClientEvent) -> Result<Value, ChannelError> {
        let max_transmissions = self.policy.max_transmissions.max(1);
        let mut event = event;

        for transmission in 1..=max_transmissions {
            debug!(
                kind = %event.kind(),
                message_id = %event.message_id,
                transmission,
                max_transmissions,
                "sending event to driver"
            );
            let frame = self.serde.serialize(&event)?;

            match self.transmit(&frame).await {
                Exchange::Reply(bytes) => return Ok(self.serde.deserialize(&bytes)?),
                Exchange::Empty => {
                    debug!(message_id = %event.message_id, "driver sent an empty reply, resending");
                }
                Exchange::TimedOut => {
                    warn!(
                        endpoint = %self.endpoint,
                        message_id = %event.message_id,
                        timeout_ms = self.policy.request_timeout.as_millis() as u64,
                        "no reply from driver, reconnecting"
                    );
                }
                Exchange::Failed(err) => {
                    warn!(
                        endpoint = %self.endpoint,
                        message_id = %event.message_id,
                        error = %err,
                        "transport error, reconnecting"
                    );
                }
                Exchange::ConnectFailed(err) => {
                    warn!(endpoint = %self.endpoint, error = %err, "failed to connect to driver");
                }
            }

            if transmission < max_transmissions {
                event = self.messages.copy(&event);
            }
        }

        Err(ChannelError::Exhausted {
            endpoint: self.endpoint.to_string(),
            transmissions: max_transmissions,
        })
    }

    async fn transmit(&mut self, frame: &[u8]) -> Exchange {
        let deadline = Instant::now() + self.policy.request_timeout;

        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                match tokio::time::timeout_at(deadline, self.connector.connect(&self.endpoint))
                    .await
                {
                    Ok(Ok(connection)) => connection,
                    Ok(Err(err)) => {
                        // Keep the pace of one transmission per timeout while the driver is down.
                        tokio::time::sleep_until(deadline).await;
                        return Exchange::ConnectFailed(err);
                    }
                    Err(_) => return Exchange::TimedOut,
                }
            }
        };

        let exchange = tokio::time::timeout_at(deadline, async {
            connection.send_frame(frame).await?;
            connection.recv_frame().await
        })
        .await;

        match exchange {
            Ok(Ok(reply)) => {
                self.connection = Some(connection);
                if reply.is_empty() {
                    Exchange::Empty
                } else {
                    Exchange::Reply(reply)
                }
            }
            Ok(Err(err)) => {
                connection.close();
                Exchange::Failed(err)
            }
            Err(_) => {
                connection.close();
                Exchange::TimedOut
            }
        }
    }

    /// Close the current connection, if any.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}
