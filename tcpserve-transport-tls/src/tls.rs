//! TLS upgrade for accepted connections
//!
//! The handshake runs on the connection's own worker, never on the accept
//! loop, so a slow or hostile client cannot stall other accepts.

use rustls::{Certificate, PrivateKey, ServerConfig};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tcpserve_core::transport::{CloseHandle, TransportStream};
use tcpserve_core::{ConfigError, Error, Result};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Performs server-side TLS handshakes
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}

impl TlsAcceptor {
    /// Create an acceptor from a rustls server configuration
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsAcceptor::from(config),
        }
    }

    /// Run the handshake over an accepted stream
    pub async fn accept<S: TransportStream>(&self, stream: S) -> Result<TlsStream<S>> {
        let remote_addr = stream.remote_addr()?;
        let local_addr = stream.local_addr()?;
        let close_handle = stream.close_handle();

        let inner = self
            .inner
            .accept(stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {} failed: {}", remote_addr, e)))?;

        Ok(TlsStream {
            inner,
            remote_addr,
            local_addr,
            close_handle,
        })
    }
}

/// Server-side TLS stream over a transport stream
#[derive(Debug)]
pub struct TlsStream<S> {
    inner: tokio_rustls::server::TlsStream<S>,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    close_handle: CloseHandle,
}

impl<S> TlsStream<S> {
    /// SNI hostname sent by the client, if any
    pub fn server_name(&self) -> Option<&str> {
        self.inner.get_ref().1.server_name()
    }
}

impl<S: TransportStream> AsyncRead for TlsStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: TransportStream> AsyncWrite for TlsStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<S: TransportStream> TransportStream for TlsStream<S> {
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

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        Error::Config(ConfigError::Validation(format!(
            "Failed to open {} file {}: {}",
            what,
            path.display(),
            e
        )))
    })
}

/// Load every certificate from a PEM file
pub fn load_certs(path: impl AsRef<Path>) -> Result<Vec<Certificate>> {
    let path = path.as_ref();
    let pem = read_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).map_err(|e| {
        Error::Config(ConfigError::Validation(format!(
            "Failed to parse certificate file {}: {}",
            path.display(),
            e
        )))
    })?;

    if certs.is_empty() {
        return Err(Error::Config(ConfigError::Validation(format!(
            "No certificates found in {}",
            path.display()
        ))));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Load the first PKCS#8 or RSA private key from a PEM file
pub fn load_private_key(path: impl AsRef<Path>) -> Result<PrivateKey> {
    let path = path.as_ref();
    let pem = read_pem(path, "private key")?;

    if let Ok(keys) = rustls_pemfile::pkcs8_private_keys(&mut pem.as_slice()) {
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }
    }

    let keys = rustls_pemfile::rsa_private_keys(&mut pem.as_slice()).map_err(|e| {
        Error::Config(ConfigError::Validation(format!(
            "Failed to parse private key file {}: {}",
            path.display(),
            e
        )))
    })?;

    keys.into_iter().next().map(PrivateKey).ok_or_else(|| {
        Error::Config(ConfigError::Validation(format!(
            "No private keys found in {}",
            path.display()
        )))
    })
}

/// Build a server configuration from PEM certificate and key files
pub fn server_config_from_pem(
    cert_file: impl AsRef<Path>,
    key_file: impl AsRef<Path>,
) -> Result<ServerConfig> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| {
            Error::Config(ConfigError::Validation(format!(
                "Invalid TLS certificate/key: {}",
                e
            )))
        })
}
