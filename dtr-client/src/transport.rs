//! Duplex request/reply transport to the driver.
//!
//! A [`Connector`] opens connections to an [`Endpoint`]; a [`Connection`]
//! carries length-prefixed frames (4-byte big-endian length, then payload).
//! A zero-length frame is a valid, *empty* reply. The reliable channel owns
//! at most one connection at a time and never reuses a connection after a
//! timeout.

use dtr_common::codec::MAX_FRAME_LEN;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Transport address of the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Opens connections to the driver.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Connection: Connection;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Connection>;
}

/// One live connection to the driver.
#[allow(async_fn_in_trait)]
pub trait Connection {
    /// Transmit one frame.
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Wait for the next frame. An empty vector is an empty reply.
    async fn recv_frame(&mut self) -> io::Result<Vec<u8>>;

    /// Tear the connection down without waiting for unsent data.
    fn close(self);
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {MAX_FRAME_LEN}", frame.len()),
        ));
    }
    writer.write_u32(frame.len() as u32).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced a {len} byte frame (limit {MAX_FRAME_LEN})"),
        ));
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Connects to the driver over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpConnection> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        debug!(%endpoint, "connected to driver");
        Ok(TcpConnection { stream })
    }
}

#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Connection for TcpConnection {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        write_frame(&mut self.stream, frame).await
    }

    async fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        read_frame(&mut self.stream).await
    }

    #[allow(deprecated)]
    fn close(self) {
        // Zero linger: the kernel discards unsent data instead of holding the socket open.
        if let Err(err) = self.stream.set_linger(Some(Duration::ZERO)) {
            debug!(error = %err, "failed to set zero linger before close");
        }
        drop(self.stream);
    }
}
