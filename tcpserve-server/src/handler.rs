//! Connection handlers
//!
//! A handler owns one accepted [`Connection`] for as long as it likes. It
//! receives a cancel [`Signal`] that fires when the server begins shutting
//! down; cooperative handlers finish their current unit of work and return.
//! Handlers that ignore it are force-closed when a shutdown deadline hits.

use crate::connection::Connection;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tcpserve_core::{Result, Signal};

/// Trait for handling accepted connections
pub trait Handler: Send + Sync + 'static {
    /// Serve a connection until done.
    ///
    /// The server closes the socket after the returned future completes,
    /// whatever its outcome. Errors and panics are logged and contained to
    /// this connection.
    fn serve<'a>(
        &'a self,
        connection: Connection,
        cancel: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Handler shared by every connection worker
pub type SharedHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve<'a>(
        &'a self,
        connection: Connection,
        cancel: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        (**self).serve(connection, cancel)
    }
}

/// Handler backed by a closure
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Connection, Signal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn serve<'a>(
        &'a self,
        connection: Connection,
        cancel: Signal,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin((self.f)(connection, cancel))
    }
}

/// Create a handler from an async closure
///
/// ```no_run
/// use tcpserve_server::handler::from_fn;
/// use tokio::io::AsyncWriteExt;
///
/// let handler = from_fn(|mut conn, _cancel| async move {
///     conn.write_all(b"hello\r\n").await?;
///     Ok(())
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Connection, Signal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler { f }
}
