//! TLS Transport for tcpserve
//!
//! Server-side TLS handshake over any [`TransportStream`] plus PEM loading
//! for certificates and private keys.
//!
//! [`TransportStream`]: tcpserve_core::transport::TransportStream

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/tcpserve-transport-tls/")]

pub mod tls;

// Re-export TLS transport types
pub use tls::{load_certs, load_private_key, server_config_from_pem, TlsAcceptor, TlsStream};

/// Prelude module
pub mod prelude {
    pub use crate::tls::{server_config_from_pem, TlsAcceptor, TlsStream};
    pub use tcpserve_core::transport::{Transport, TransportStream};
}
