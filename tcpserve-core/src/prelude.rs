//! Prelude module for tcpserve Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::error::{ConfigError, Error, Result};
pub use crate::readline::{read_line_limited, trim_crlf};
pub use crate::signal::Signal;
pub use crate::transport::{CloseHandle, Transport, TransportStream};

// Re-export commonly used external dependencies
pub use thiserror::Error as ThisError;
pub use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
