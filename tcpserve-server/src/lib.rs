//! tcpserve Server
//!
//! TCP connection server with a live-connection registry, graceful and
//! immediate shutdown, optional TLS, and a line-session engine for text
//! protocols.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tcpserve_server::prelude::*;
//!
//! struct Pong;
//!
//! #[async_trait::async_trait]
//! impl LineHandler for Pong {
//!     async fn on_line(&self, session: &mut LineSession, line: &str) -> usize {
//!         let _ = session.send_line(&format!("PONG: {}", line)).await;
//!         0
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> ServerResult<()> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")
//!         .build_with_handler(LineProtocol::new(Pong))?;
//!
//!     server.listen_and_serve().await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tcpserve-server/")]

// Public modules
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod line;
pub mod logging;
pub mod manager;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
#[cfg(feature = "tls-transport")]
pub use config::TlsConfig;
pub use config::{ServerConfig, DEFAULT_ACCEPT_BACKOFF, DEFAULT_DRAIN_INTERVAL};
pub use connection::{Connection, UserData};
pub use error::{ServerError, ServerResult};
pub use handler::{from_fn, FnHandler, Handler, SharedHandler};
pub use line::{LineHandler, LineProtocol, LineSession, DEFAULT_MAX_LINE_SIZE};
pub use manager::{ConnectionManager, ConnectionRecord, ManagerStats};
pub use server::{ErrorSink, Server, ServerBuilder};
