//! Error types for tcpserve
//!
//! Errors raised below the server layer: stream I/O, line framing, TLS
//! setup and configuration validation.

#![allow(missing_docs)]

use std::io;
use thiserror::Error;

/// Result type alias for tcpserve operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for transport and session operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line exceeded the configured maximum (delimiter included)
    #[error("line too long: exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The peer accepted fewer bytes than were written
    #[error("short write")]
    ShortWrite,

    /// TLS setup or handshake errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The stream or session is already closed
    #[error("connection closed")]
    Closed,

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Whether an accept failure is worth retrying after a short pause.
    ///
    /// Covers interrupted or aborted handshakes at the socket level and
    /// resource exhaustion (file descriptor limits, memory).
    pub fn is_transient_accept(&self) -> bool {
        match self {
            Error::Io(err) => is_transient_io(err),
            _ => false,
        }
    }
}

fn is_transient_io(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) {
        return true;
    }

    // ENFILE / EMFILE
    #[cfg(unix)]
    if matches!(err.raw_os_error(), Some(23) | Some(24)) {
        return true;
    }

    false
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
