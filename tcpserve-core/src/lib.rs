//! # tcpserve Core
//!
//! Transport-level building blocks shared by the tcpserve crates.
//!
//! This crate provides:
//!
//! - Error handling and types
//! - Signal-once cancellation slots
//! - The bounded line reader used by the line-session engine
//! - Transport layer abstractions

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tcpserve-core/")]

// Core modules
pub mod error;
pub mod readline;
pub mod signal;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{ConfigError, Error, Result};
pub use readline::{read_line_limited, trim_crlf};
pub use signal::Signal;
pub use transport::{CloseHandle, Transport, TransportStream};
