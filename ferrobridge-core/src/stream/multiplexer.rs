//! Stream multiplexer over a single carrier connection
//!
//! `chan` and `file` connections are turned into a multiplexer; every link
//! the bridge dispatches to a client becomes one virtual stream on it.

use crate::transport::BoxedStream;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ferrobridge_common::{BridgeError, Result};
use ferrobridge_protocol::{MuxCodec, MuxFrame};
use futures::{SinkExt, StreamExt};
use kanal::{bounded_async, AsyncReceiver, AsyncSender, ReceiveError, SendError};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const FRAME_QUEUE_DEPTH: usize = 1024;
const STREAM_QUEUE_DEPTH: usize = 16;
const INCOMING_QUEUE_DEPTH: usize = 10;

type StreamMap = DashMap<u32, AsyncSender<Bytes>>;

/// Manages virtual streams over one carrier connection
///
/// - `DashMap` for concurrent stream lookup without a global lock
/// - `AtomicU32` for stream id allocation
/// - `kanal` channels between the carrier tasks and the streams
///
/// The multiplexer is closed once the carrier fails, stays idle longer than
/// the configured timeout, or [`Multiplexer::close`] is called.
#[derive(Clone)]
pub struct Multiplexer {
    streams: Arc<StreamMap>,
    next_stream_id: Arc<AtomicU32>,
    frame_tx: AsyncSender<MuxFrame>,
    cancel: CancellationToken,
    remote_addr: SocketAddr,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("remote_addr", &self.remote_addr)
            .field("streams", &self.streams.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Start the carrier tasks over `io`.
    ///
    /// The bridge side allocates even stream ids, the client side odd ones.
    /// Streams opened by the peer arrive on the returned receiver.
    pub fn spawn(
        io: BoxedStream,
        remote_addr: SocketAddr,
        is_client: bool,
        idle_timeout: Duration,
    ) -> (Self, AsyncReceiver<VirtualStream>) {
        let (read_half, write_half) = tokio::io::split(io);
        let (frame_tx, frame_rx) = bounded_async(FRAME_QUEUE_DEPTH);
        let (incoming_tx, incoming_rx) = bounded_async(INCOMING_QUEUE_DEPTH);
        let initial_stream_id = if is_client { 1 } else { 2 };

        let mux = Self {
            streams: Arc::new(DashMap::new()),
            next_stream_id: Arc::new(AtomicU32::new(initial_stream_id)),
            frame_tx,
            cancel: CancellationToken::new(),
            remote_addr,
        };

        tokio::spawn(run_writer(
            frame_rx,
            FramedWrite::new(write_half, MuxCodec::new()),
            mux.cancel.clone(),
            idle_timeout / 3,
        ));
        tokio::spawn(mux.clone().run_reader(
            FramedRead::new(read_half, MuxCodec::new()),
            incoming_tx,
            idle_timeout,
        ));

        (mux, incoming_rx)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear down the carrier and end every open stream.
    pub fn close(&self) {
        self.cancel.cancel();
        self.streams.clear();
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    fn allocate_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(2, Ordering::Relaxed)
    }

    /// Open a new outbound stream
    pub async fn open_stream(&self) -> Result<VirtualStream> {
        if self.is_closed() {
            return Err(BridgeError::ChannelClosed("multiplexer closed".into()));
        }
        let stream_id = self.allocate_stream_id();
        let (tx, rx) = bounded_async(STREAM_QUEUE_DEPTH);
        self.streams.insert(stream_id, tx);

        if let Err(e) = self.frame_tx.send(MuxFrame::Open { stream_id }).await {
            self.streams.remove(&stream_id);
            return Err(BridgeError::ChannelClosed(e.to_string()));
        }

        Ok(self.virtual_stream(stream_id, rx))
    }

    fn virtual_stream(&self, stream_id: u32, rx: AsyncReceiver<Bytes>) -> VirtualStream {
        VirtualStream {
            stream_id,
            rx,
            tx: self.frame_tx.clone(),
            streams: Arc::clone(&self.streams),
            read_buffer: Bytes::new(),
            pending_recv: None,
            pending_send: None,
            closed: false,
        }
    }

    async fn run_reader(
        self,
        mut frames: FramedRead<ReadHalf<BoxedStream>, MuxCodec>,
        incoming_tx: AsyncSender<VirtualStream>,
        idle_timeout: Duration,
    ) {
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => break,
                next = tokio::time::timeout(idle_timeout, frames.next()) => next,
            };
            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => {
                    debug!(addr = %self.remote_addr, "mux carrier error: {}", e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(addr = %self.remote_addr, "mux carrier idle for {:?}", idle_timeout);
                    break;
                }
            };
            self.process_frame(frame, &incoming_tx).await;
        }
        self.close();
    }

    async fn process_frame(&self, frame: MuxFrame, incoming_tx: &AsyncSender<VirtualStream>) {
        match frame {
            MuxFrame::Open { stream_id } => {
                let (tx, rx) = bounded_async(STREAM_QUEUE_DEPTH);
                match self.streams.entry(stream_id) {
                    Entry::Occupied(_) => {
                        warn!("Stream {} already exists", stream_id);
                        return;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(tx);
                    }
                }
                let stream = self.virtual_stream(stream_id, rx);
                if incoming_tx.send(stream).await.is_err() {
                    warn!("Failed to queue new stream {}", stream_id);
                }
            }
            MuxFrame::Data { stream_id, data } => {
                let tx = self.streams.get(&stream_id).map(|r| r.clone());
                if let Some(tx) = tx {
                    if tx.send(data).await.is_err() {
                        self.streams.remove(&stream_id);
                    }
                }
            }
            MuxFrame::Close { stream_id } => {
                // dropping the sender ends the stream with EOF
                self.streams.remove(&stream_id);
            }
            MuxFrame::Ping => {}
        }
    }
}

async fn run_writer(
    frame_rx: AsyncReceiver<MuxFrame>,
    mut sink: FramedWrite<WriteHalf<BoxedStream>, MuxCodec>,
    cancel: CancellationToken,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval.max(Duration::from_millis(10)));
    ping.tick().await;

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            _ = ping.tick() => MuxFrame::Ping,
            frame = frame_rx.recv() => match frame {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            debug!("mux write failed: {}", e);
            break;
        }
    }
    cancel.cancel();
    let _ = sink.close().await;
}

type RecvFuture =
    Pin<Box<dyn std::future::Future<Output = std::result::Result<Bytes, ReceiveError>> + Send>>;

type SendFuture =
    Pin<Box<dyn std::future::Future<Output = std::result::Result<(), SendError>> + Send>>;

/// A virtual stream that implements `AsyncRead` + `AsyncWrite`
///
/// The polling implementation boxes kanal's async send/recv futures to bridge
/// them into tokio's poll-based traits.
pub struct VirtualStream {
    stream_id: u32,
    rx: AsyncReceiver<Bytes>,
    tx: AsyncSender<MuxFrame>,
    streams: Arc<StreamMap>,
    read_buffer: Bytes,
    pending_recv: Option<RecvFuture>,
    /// In-flight send and the number of bytes it carries
    pending_send: Option<(SendFuture, usize)>,
    closed: bool,
}

impl std::fmt::Debug for VirtualStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualStream")
            .field("stream_id", &self.stream_id)
            .field("read_buffer_len", &self.read_buffer.len())
            .finish_non_exhaustive()
    }
}

impl VirtualStream {
    pub fn id(&self) -> u32 {
        self.stream_id
    }

    fn poll_pending_send(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let Some((fut, len)) = self.pending_send.as_mut() else {
            return Poll::Ready(Ok(0));
        };
        match fut.as_mut().poll(cx) {
            Poll::Ready(result) => {
                let len = *len;
                self.pending_send = None;
                Poll::Ready(
                    result
                        .map(|()| len)
                        .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())),
                )
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.streams.remove(&self.stream_id);
        if !self.closed {
            let _ = self.tx.try_send(MuxFrame::Close {
                stream_id: self.stream_id,
            });
        }
    }
}

impl AsyncRead for VirtualStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            if self.pending_recv.is_none() {
                let rx = self.rx.clone();
                self.pending_recv = Some(Box::pin(async move { rx.recv().await }));
            }
            let Some(fut) = self.pending_recv.as_mut() else {
                return Poll::Pending;
            };
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(data)) => {
                    self.pending_recv = None;
                    self.read_buffer = data;
                }
                // sender dropped: stream closed by peer or carrier gone
                Poll::Ready(Err(_)) => {
                    self.pending_recv = None;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        let len = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk = self.read_buffer.split_to(len);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for VirtualStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.pending_send.is_some() {
            return self.poll_pending_send(cx);
        }
        if self.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream shut down",
            )));
        }

        let frame = MuxFrame::Data {
            stream_id: self.stream_id,
            data: Bytes::copy_from_slice(buf),
        };
        let tx = self.tx.clone();
        self.pending_send = Some((Box::pin(async move { tx.send(frame).await }), buf.len()));
        self.poll_pending_send(cx)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_pending_send(cx).map_ok(|_| ())
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.pending_send.is_some() && self.poll_pending_send(cx).is_pending() {
            return Poll::Pending;
        }
        if self.closed {
            return Poll::Ready(Ok(()));
        }

        self.closed = true;
        let frame = MuxFrame::Close {
            stream_id: self.stream_id,
        };
        let tx = self.tx.clone();
        self.pending_send = Some((Box::pin(async move { tx.send(frame).await }), 0));
        self.poll_pending_send(cx).map_ok(|_| ())
    }
}
