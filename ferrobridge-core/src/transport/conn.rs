//! Framed primitives over one accepted bridge connection
//!
//! A bridge connection speaks a mix of fixed-size reads (probe, verify key,
//! flags, tokens) and length-prefixed messages. Every read honours an optional
//! deadline, which the handshake sets and long-lived work types clear.

use super::signal::{SignalHandle, SignalReader};
use super::BoxedStream;
use ferrobridge_common::{BridgeError, Result};
use ferrobridge_protocol::constants::FLAG_LEN;
use ferrobridge_protocol::{Flag, LenPrefixCodec};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

pub struct BridgeConn {
    stream: BoxedStream,
    remote_addr: SocketAddr,
    deadline: Option<Instant>,
    codec: LenPrefixCodec,
}

impl std::fmt::Debug for BridgeConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConn")
            .field("remote_addr", &self.remote_addr)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"))?,
        None => fut.await,
    }
}

impl BridgeConn {
    pub fn new(stream: BoxedStream, remote_addr: SocketAddr, max_message_len: usize) -> Self {
        Self {
            stream,
            remote_addr,
            deadline: None,
            codec: LenPrefixCodec::new(max_message_len),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Fail every subsequent read that has not completed within `timeout`.
    pub fn set_read_deadline(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Make the connection long-lived.
    pub fn clear_read_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn has_read_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Read exactly `len` bytes
    pub async fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        with_deadline(self.deadline, self.stream.read_exact(&mut buf)).await?;
        Ok(buf)
    }

    pub async fn read_flag(&mut self) -> io::Result<Flag> {
        let mut buf = [0u8; FLAG_LEN];
        with_deadline(self.deadline, self.stream.read_exact(&mut buf)).await?;
        Ok(Flag(buf))
    }

    pub async fn read_i32(&mut self) -> io::Result<i32> {
        with_deadline(self.deadline, self.stream.read_i32_le()).await
    }

    /// Read a length prefix followed by that many content bytes
    pub async fn read_len_content(&mut self) -> io::Result<Vec<u8>> {
        let raw = self.read_i32().await?;
        let len = self.codec.check_len(raw)?;
        self.read_bytes(len).await
    }

    /// Read a length-prefixed JSON record
    pub async fn read_json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let content = self.read_len_content().await?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    pub async fn write_flag(&mut self, flag: &[u8; FLAG_LEN]) -> io::Result<()> {
        self.write_all(flag).await
    }

    pub async fn write_len_content(&mut self, content: &[u8]) -> io::Result<()> {
        let framed = self.codec.frame(content)?;
        self.write_all(&framed).await
    }

    /// A single byte, `1` for true
    pub async fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_all(&[u8::from(value)]).await
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(addr = %self.remote_addr, "shutdown error: {}", e);
        }
    }

    pub fn into_stream(self) -> BoxedStream {
        self.stream
    }

    /// Split into the health-report reader and the shared signal writer.
    pub fn into_signal(self) -> (SignalReader, SignalHandle) {
        SignalHandle::spawn(self.stream, self.remote_addr, self.codec)
    }
}

/// Map a closed or failed read into the bridge error taxonomy
pub fn read_error(what: &str, err: io::Error) -> BridgeError {
    if err.kind() == io::ErrorKind::TimedOut {
        BridgeError::Timeout(format!("{what}: {err}"))
    } else {
        BridgeError::Io(err)
    }
}
