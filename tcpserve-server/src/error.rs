//! Server error types
//!
//! Only listener-level failures are ever returned from [`Server::serve`].
//! The remaining variants describe per-connection failures that the server
//! contains, logs and hands to the optional error sink.
//!
//! [`Server::serve`]: crate::server::Server::serve

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tcpserve_core::error::{ConfigError, Error};

/// Result type alias for server operations
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Server-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listening socket failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: Error,
    },

    /// Accepting failed with a non-transient error
    #[error("accept failed: {0}")]
    Accept(#[source] Error),

    /// The listener was already closed by an earlier `close` or `shutdown`
    #[error("server already closed")]
    AlreadyClosed,

    /// `serve` was called on a server that is already serving
    #[error("server is already serving")]
    AlreadyServing,

    /// Graceful shutdown ran out of time and force-closed the stragglers
    #[error("shutdown deadline of {grace:?} exceeded with {remaining} connection(s) open")]
    DeadlineExceeded {
        /// Grace period that elapsed
        grace: Duration,
        /// Connections still registered when the deadline hit
        remaining: usize,
    },

    /// TLS handshake with a client failed
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        /// Connection id
        id: u64,
        /// Client address
        peer: SocketAddr,
        /// Underlying error
        #[source]
        source: Error,
    },

    /// A handler panicked; the panic was caught at the connection boundary
    #[error("handler for connection {id} ({peer}) panicked: {message}")]
    HandlerPanicked {
        /// Connection id
        id: u64,
        /// Client address
        peer: SocketAddr,
        /// Panic payload rendered as text
        message: String,
    },

    /// A handler returned an error
    #[error("handler for connection {id} ({peer}) failed: {source}")]
    Handler {
        /// Connection id
        id: u64,
        /// Client address
        peer: SocketAddr,
        /// Error returned by the handler
        #[source]
        source: Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] Error),
}

impl ServerError {
    /// Whether this error only affected a single connection
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            ServerError::Handshake { .. }
                | ServerError::HandlerPanicked { .. }
                | ServerError::Handler { .. }
        )
    }

    /// Connection id for connection-scoped errors
    pub fn connection_id(&self) -> Option<u64> {
        match self {
            ServerError::Handshake { id, .. }
            | ServerError::HandlerPanicked { id, .. }
            | ServerError::Handler { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Render a panic payload caught by `catch_unwind`
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
