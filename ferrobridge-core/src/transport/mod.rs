//! Transport layer: accepted control connections and their framing primitives

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

pub mod conn;
pub mod signal;
pub mod socket_tuning;

pub use conn::BridgeConn;
pub use signal::{SignalHandle, SignalReader};

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// Source of bridge control connections.
///
/// The plain TCP listener is the default; a port multiplexer that sniffs
/// bridge traffic out of a shared web port can implement this as well.
#[async_trait]
pub trait ControlListener: Send + Sync {
    async fn accept(&self) -> io::Result<(BoxedStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl ControlListener for TcpListener {
    async fn accept(&self) -> io::Result<(BoxedStream, SocketAddr)> {
        let (tcp_stream, addr) = TcpListener::accept(self).await?;
        socket_tuning::configure_socket_silent(&tcp_stream);
        Ok((Box::pin(tcp_stream), addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Bind the control port
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Dial a target straight from the bridge host
pub async fn dial(addr: &str) -> io::Result<BoxedStream> {
    let stream = TcpStream::connect(addr).await?;
    socket_tuning::configure_socket_silent(&stream);
    Ok(Box::pin(stream))
}
