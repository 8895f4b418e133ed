//! Connection handles
//!
//! A [`Connection`] is what a handler receives for each accepted client:
//! a bidirectional byte stream (plain or TLS) plus the addresses and the
//! server's user data.

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tcpserve_core::transport::{CloseHandle, TransportStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Opaque value shared by every connection of a server
pub type UserData = Arc<dyn Any + Send + Sync>;

/// An accepted client connection
pub struct Connection {
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    stream: Box<dyn TransportStream>,
    close_handle: CloseHandle,
    user_data: Option<UserData>,
    established_at: Instant,
    secure: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("secure", &self.secure)
            .field("stream", &"<stream>")
            .finish()
    }
}

impl Connection {
    /// Wrap a transport stream
    pub fn new(
        id: u64,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        stream: Box<dyn TransportStream>,
    ) -> Self {
        let close_handle = stream.close_handle();
        Self {
            id,
            remote_addr,
            local_addr,
            stream,
            close_handle,
            user_data: None,
            established_at: Instant::now(),
            secure: false,
        }
    }

    pub(crate) fn with_user_data(mut self, user_data: Option<UserData>) -> Self {
        self.user_data = user_data;
        self
    }

    pub(crate) fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Registry id, unique for the server's lifetime
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Client address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address the client connected to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the stream went through a TLS handshake
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// When the connection was accepted
    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// The server's user data, if it is of type `T`
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }

    /// Sever the socket immediately, waking any pending read or write
    pub fn abort(&self) -> io::Result<()> {
        self.close_handle.close()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.stream).poll_shutdown(cx)
    }
}
