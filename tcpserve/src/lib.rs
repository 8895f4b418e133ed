//! # tcpserve
//!
//! **Minimal TCP connection server with coordinated shutdown and a
//! line-oriented session engine**
//!
//! tcpserve accepts connections on one listening address, hands each one to
//! your handler on its own task, keeps a registry of live connections, and
//! shuts down either gracefully (signal handlers, wait for a grace period)
//! or immediately (sever every socket). TLS is optional.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tcpserve::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:1234")
//!         .build_with_handler(from_fn(|mut conn, _cancel| async move {
//!             let mut buf = [0u8; 1024];
//!             loop {
//!                 let n = conn.read(&mut buf).await?;
//!                 if n == 0 {
//!                     return Ok(());
//!                 }
//!                 conn.write_all(&buf[..n]).await?;
//!             }
//!         }))?;
//!
//!     server.listen_and_serve().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `server` (default): connection server and line-session engine
//! - `transport-tcp` (default): plain TCP listener
//! - `transport-tls`: TLS via rustls
//! - `metrics`: connection gauges through the `metrics` facade
//! - `logging`: ready-made `tracing-subscriber` setup

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tcpserve/")]

// Re-export core components
pub use tcpserve_core::*;

#[cfg(feature = "transport-tcp")]
pub use tcpserve_transport_tcp as transport_tcp;

#[cfg(feature = "transport-tls")]
pub use tcpserve_transport_tls as transport_tls;

#[cfg(feature = "server")]
pub use tcpserve_server as server;

#[cfg(feature = "server")]
pub use tcpserve_server::{Server, ServerBuilder, ServerError};

/// Prelude module with common imports
pub mod prelude {
    pub use tcpserve_core::prelude::*;

    #[cfg(feature = "server")]
    pub use tcpserve_server::prelude::*;

    #[cfg(feature = "transport-tcp")]
    pub use tcpserve_transport_tcp::prelude::*;

    #[cfg(feature = "transport-tls")]
    pub use tcpserve_transport_tls::prelude::*;
}
