//! Server configuration
//!
//! This module provides configuration options for the connection server.

use std::time::Duration;
use tcpserve_core::error::ConfigError;

#[cfg(feature = "tls-transport")]
use rustls::ServerConfig as RustlsServerConfig;
#[cfg(feature = "tls-transport")]
use std::sync::Arc;

/// Default pause before retrying a transiently failed accept
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// Default interval at which graceful shutdown re-checks the registry
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(5);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`
    pub bind_address: String,
    /// Pause before retrying a transient accept error
    pub accept_backoff: Duration,
    /// Registry poll interval during graceful shutdown
    pub drain_interval: Duration,
    /// TLS configuration
    #[cfg(feature = "tls-transport")]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            #[cfg(feature = "tls-transport")]
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "bind_address".to_string(),
            });
        }

        if self.accept_backoff.is_zero() {
            return Err(ConfigError::Validation(
                "accept_backoff must be greater than 0".to_string(),
            ));
        }

        if self.drain_interval.is_zero() {
            return Err(ConfigError::Validation(
                "drain_interval must be greater than 0".to_string(),
            ));
        }

        #[cfg(feature = "tls-transport")]
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }

        Ok(())
    }
}

/// TLS configuration
///
/// Certificate and key files take precedence over a pre-built rustls
/// configuration when both are present.
#[cfg(feature = "tls-transport")]
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// Path to PEM certificate chain
    pub cert_file: Option<String>,
    /// Path to PEM private key
    pub key_file: Option<String>,
    /// Pre-built rustls configuration
    pub server_config: Option<Arc<RustlsServerConfig>>,
}

#[cfg(feature = "tls-transport")]
impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("server_config", &self.server_config.as_ref().map(|_| "<rustls>"))
            .finish()
    }
}

#[cfg(feature = "tls-transport")]
impl TlsConfig {
    /// Create a TLS configuration from certificate and key files
    pub fn new(cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        Self {
            cert_file: Some(cert_file.into()),
            key_file: Some(key_file.into()),
            server_config: None,
        }
    }

    /// Use a pre-built rustls configuration
    pub fn from_server_config(config: Arc<RustlsServerConfig>) -> Self {
        Self {
            cert_file: None,
            key_file: None,
            server_config: Some(config),
        }
    }

    /// Override the certificate files, keeping any pre-built configuration
    /// as a fallback
    pub fn with_files(mut self, cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self
    }

    fn has_files(&self) -> bool {
        self.cert_file.as_deref().is_some_and(|f| !f.is_empty())
            || self.key_file.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.has_files() {
            if self.cert_file.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingField {
                    field: "tls.cert_file".to_string(),
                });
            }
            if self.key_file.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingField {
                    field: "tls.key_file".to_string(),
                });
            }
            return Ok(());
        }

        if self.server_config.is_none() {
            return Err(ConfigError::Validation(
                "TLS requires certificate/key files or a rustls ServerConfig".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve into a rustls configuration, loading PEM files if set
    pub fn build(&self) -> tcpserve_core::Result<Arc<RustlsServerConfig>> {
        self.validate()?;
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) if self.has_files() => Ok(Arc::new(
                tcpserve_transport_tls::server_config_from_pem(cert, key)?,
            )),
            _ => self.server_config.clone().ok_or_else(|| {
                ConfigError::MissingField {
                    field: "tls.server_config".to_string(),
                }
                .into()
            }),
        }
    }
}
