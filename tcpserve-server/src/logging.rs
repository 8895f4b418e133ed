//! Logging setup
//!
//! The server emits `tracing` events unconditionally; installing a
//! subscriber is left to the application. With the `logging` feature this
//! module offers a ready-made `fmt` subscriber filtered through `RUST_LOG`.

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    init_with_filter(filter)
}

/// Install a global `fmt` subscriber with an explicit filter directive
#[cfg(feature = "logging")]
pub fn init_logging_with(directives: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::try_new(directives)?;
    init_with_filter(filter)
}

#[cfg(feature = "logging")]
fn init_with_filter(
    filter: tracing_subscriber::EnvFilter,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}
