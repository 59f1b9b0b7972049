//! Signal (control) channel of a client session
//!
//! The signal connection is read by exactly one task (the health monitor)
//! while several tasks write to it: a superseding `main` registration sends a
//! close notice, and P2P rendezvous pushes a notice plus two messages. Writes
//! go through a queue drained by a single writer task so each message lands on
//! the wire whole and in order.

use super::BoxedStream;
use bytes::{Bytes, BytesMut};
use ferrobridge_common::{BridgeError, Result};
use ferrobridge_protocol::constants::{NEW_UDP_CONN, RES_CLOSE};
use ferrobridge_protocol::{HealthReport, LenPrefixCodec};
use futures::StreamExt;
use kanal::{bounded_async, AsyncReceiver, AsyncSender};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SIGNAL_QUEUE_DEPTH: usize = 64;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Shared writer side of a signal connection
#[derive(Clone)]
pub struct SignalHandle {
    inner: Arc<SignalInner>,
}

impl std::fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandle")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct SignalInner {
    id: u64,
    remote_addr: SocketAddr,
    tx: AsyncSender<Bytes>,
    cancel: CancellationToken,
    codec: LenPrefixCodec,
}

impl SignalHandle {
    pub(crate) fn spawn(
        stream: BoxedStream,
        remote_addr: SocketAddr,
        codec: LenPrefixCodec,
    ) -> (SignalReader, SignalHandle) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = bounded_async(SIGNAL_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        tokio::spawn(run_signal_writer(rx, write_half, cancel.clone(), remote_addr));

        let handle = SignalHandle {
            inner: Arc::new(SignalInner {
                id: NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                tx,
                cancel: cancel.clone(),
                codec,
            }),
        };
        let reader = SignalReader {
            frames: FramedRead::new(read_half, codec),
            cancel,
            remote_addr,
        };
        (reader, handle)
    }

    /// Process-unique id of this signal connection
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Queue raw bytes for the writer task
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::ChannelClosed("signal connection closed".into()));
        }
        self.inner
            .tx
            .send(bytes)
            .await
            .map_err(|e| BridgeError::ChannelClosed(e.to_string()))
    }

    /// Tell the client this signal connection has been superseded.
    ///
    /// Enqueued synchronously so the notice is ordered before anything the
    /// replacement registration does afterwards.
    pub fn notify_close(&self) -> bool {
        matches!(self.inner.tx.try_send(Bytes::from_static(RES_CLOSE)), Ok(true))
    }

    /// Announce a P2P rendezvous: notice, rendezvous address, token.
    pub async fn send_new_udp_conn(&self, rendezvous: &str, token: &[u8]) -> Result<()> {
        let mut codec = self.inner.codec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(NEW_UDP_CONN);
        codec.encode(rendezvous.as_bytes(), &mut buf)?;
        codec.encode(token, &mut buf)?;
        self.send(buf.freeze()).await
    }

    /// Close the connection; unblocks the reader as well.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn same_connection(&self, other: &SignalHandle) -> bool {
        self.id() == other.id()
    }
}

async fn run_signal_writer(
    rx: AsyncReceiver<Bytes>,
    mut write_half: WriteHalf<BoxedStream>,
    cancel: CancellationToken,
    remote_addr: SocketAddr,
) {
    loop {
        let buf = tokio::select! {
            () = cancel.cancelled() => {
                // flush whatever was queued before the close, e.g. a close notice
                while let Ok(Some(buf)) = rx.try_recv() {
                    if write_signal(&mut write_half, &buf).await.is_err() {
                        break;
                    }
                }
                break;
            }
            msg = rx.recv() => match msg {
                Ok(buf) => buf,
                Err(_) => break,
            },
        };
        if let Err(e) = write_signal(&mut write_half, &buf).await {
            debug!(addr = %remote_addr, "signal write failed: {}", e);
            cancel.cancel();
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_signal(write_half: &mut WriteHalf<BoxedStream>, buf: &[u8]) -> std::io::Result<()> {
    write_half.write_all(buf).await?;
    write_half.flush().await
}

/// Reader side of a signal connection, consumed by the health monitor
pub struct SignalReader {
    frames: FramedRead<ReadHalf<BoxedStream>, LenPrefixCodec>,
    cancel: CancellationToken,
    remote_addr: SocketAddr,
}

impl SignalReader {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Next health report; `None` once the connection is closed or broken.
    pub async fn next_report(&mut self) -> Option<Result<HealthReport>> {
        let frame = tokio::select! {
            () = self.cancel.cancelled() => return None,
            frame = self.frames.next() => frame?,
        };
        Some(match frame {
            Ok(content) => HealthReport::parse(&content)
                .ok_or_else(|| BridgeError::Protocol("receive health info error".into())),
            Err(e) => Err(BridgeError::Io(e)),
        })
    }
}
