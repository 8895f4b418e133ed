//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the tcpserve-server crate for ergonomic imports.

// Server types
pub use crate::config::ServerConfig;
#[cfg(feature = "tls-transport")]
pub use crate::config::TlsConfig;
pub use crate::connection::Connection;
pub use crate::error::{ServerError, ServerResult};
pub use crate::handler::{from_fn, Handler, SharedHandler};
pub use crate::line::{LineHandler, LineProtocol, LineSession, DEFAULT_MAX_LINE_SIZE};
pub use crate::server::{Server, ServerBuilder};

#[cfg(feature = "tcp-transport")]
pub use tcpserve_transport_tcp::TcpTransport;

// Re-export core types
pub use tcpserve_core::prelude::*;
pub use bytes::Bytes;
