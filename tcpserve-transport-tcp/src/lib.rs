//! TCP Transport for tcpserve
//!
//! This crate provides the plain TCP listener and stream used by the server.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tcpserve-transport-tcp/")]

pub mod tcp;

// Re-export TCP transport types
pub use tcp::{TcpStream, TcpTransport};

/// Prelude module
pub mod prelude {
    pub use crate::tcp::{TcpStream, TcpTransport};
    pub use tcpserve_core::transport::{Transport, TransportStream};
}
