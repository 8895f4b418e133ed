//! TCP transport implementation for tcpserve
//!
//! Accepted streams keep a duplicated descriptor of their socket so the
//! server can force-close a connection while a handler still owns it.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tcpserve_core::transport::{CloseHandle, Transport, TransportStream};
use tcpserve_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream as TokioTcpStream, ToSocketAddrs};

/// TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind a listener to the given address
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        Self::from_listener(listener)
    }

    /// Wrap an already bound tokio listener
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Wrap an already bound std listener
    pub fn from_std(listener: std::net::TcpListener) -> Result<Self> {
        listener.set_nonblocking(true).map_err(Error::Io)?;
        let listener = TcpListener::from_std(listener).map_err(Error::Io)?;
        Self::from_listener(listener)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, _addr) = self.listener.accept().await.map_err(Error::Io)?;
        TcpStream::from_tokio(stream).map_err(Error::Io)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(self) -> Result<()> {
        // the listening socket is closed when dropped
        drop(self.listener);
        Ok(())
    }
}

/// TCP stream implementation
#[derive(Debug)]
pub struct TcpStream {
    stream: TokioTcpStream,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    close_handle: CloseHandle,
}

impl TcpStream {
    /// Create a new TCP stream from a tokio TCP stream
    pub fn from_tokio(stream: TokioTcpStream) -> io::Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        // duplicate the descriptor so the socket can be shut down elsewhere
        let std_stream = stream.into_std()?;
        let close_handle = CloseHandle::new(std_stream.try_clone()?);
        let stream = TokioTcpStream::from_std(std_stream)?;

        Ok(Self {
            stream,
            remote_addr,
            local_addr,
            close_handle,
        })
    }

    /// Connect to a remote address
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TokioTcpStream::connect(addr).await.map_err(Error::Io)?;
        Self::from_tokio(stream).map_err(Error::Io)
    }

    /// Access the underlying tokio stream
    pub fn get_ref(&self) -> &TokioTcpStream {
        &self.stream
    }
}

impl AsyncRead for TcpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl TransportStream for TcpStream {
    fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.remote_addr)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_accept_and_exchange() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut client = TokioTcpStream::connect(addr).await.unwrap();
            client.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = transport.accept().await.unwrap();
        assert_eq!(stream.local_addr().unwrap(), addr);
        assert!(stream.close_handle().is_attached());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        stream.write_all(b"pong").await.unwrap();

        assert_eq!(&client.await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_close_handle_unblocks_reader() {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        let _client = TokioTcpStream::connect(addr).await.unwrap();

        let mut stream = transport.accept().await.unwrap();
        let handle = stream.close_handle();

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            stream.read(&mut buf).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.close().unwrap();

        let read = tokio::time::timeout(std::time::Duration::from_secs(2), reader)
            .await
            .expect("blocked read should return after close")
            .unwrap();
        assert_eq!(read.unwrap(), 0);
    }
}
