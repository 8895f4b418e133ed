//! Transport layer abstraction
//!
//! This module provides a transport abstraction that lets the server accept
//! connections from different listeners (plain TCP today) and hand out
//! streams that may later be wrapped in TLS.

use crate::error::Result;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport trait for abstracting different listener types
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the transport
    async fn close(self) -> Result<()>;
}

/// Trait for transport streams
///
/// Reads and writes go through tokio's `AsyncRead`/`AsyncWrite` so that
/// streams compose with `BufReader`, `BufStream` and the TLS acceptor.
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Handle able to sever this stream from another task
    fn close_handle(&self) -> CloseHandle;
}

/// Severs a socket independently of whoever owns the stream.
///
/// Holds a duplicate of the socket descriptor; shutting it down wakes any
/// read or write blocked on the original stream.
#[derive(Clone, Default)]
pub struct CloseHandle {
    socket: Option<Arc<std::net::TcpStream>>,
}

impl CloseHandle {
    /// Wrap a duplicated socket
    pub fn new(socket: std::net::TcpStream) -> Self {
        Self {
            socket: Some(Arc::new(socket)),
        }
    }

    /// A handle that is not attached to any socket; closing it does nothing
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether this handle can actually close anything
    pub fn is_attached(&self) -> bool {
        self.socket.is_some()
    }

    /// Shut down both directions of the socket.
    ///
    /// Closing an already closed socket is not an error.
    pub fn close(&self) -> io::Result<()> {
        match &self.socket {
            Some(socket) => match socket.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}
