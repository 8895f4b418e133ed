//! Connection server implementation
//!
//! This module provides the accept loop, the per-connection worker and the
//! two shutdown modes: [`Server::close`] aborts every connection at once,
//! [`Server::shutdown`] asks handlers to finish and only force-closes the
//! ones still running when the grace period runs out.

use crate::{
    config::ServerConfig,
    connection::{Connection, UserData},
    error::{panic_message, ServerError, ServerResult},
    handler::{Handler, SharedHandler},
    manager::{ConnectionManager, ConnectionRecord, ManagerStats},
};
use futures_util::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tcpserve_core::transport::{Transport, TransportStream};
use tcpserve_core::Signal;
use tokio::time::Instant;
use tracing::{debug, debug_span, error, info, warn, Instrument};

#[cfg(feature = "tls-transport")]
use crate::config::TlsConfig;

#[cfg(feature = "tls-transport")]
type Acceptor = tcpserve_transport_tls::TlsAcceptor;

/// Stand-in when TLS support is compiled out; never constructed
#[cfg(not(feature = "tls-transport"))]
#[derive(Debug, Clone)]
enum Acceptor {}

/// Callback receiving connection-scoped failures
///
/// Handshake failures, handler errors and handler panics never reach the
/// caller of [`Server::serve`]; they are logged and passed here instead.
pub type ErrorSink = Arc<dyn Fn(&ServerError) + Send + Sync>;

struct Inner {
    config: ServerConfig,
    handler: SharedHandler,
    manager: ConnectionManager,
    shutdown: Signal,
    listener_closed: Signal,
    serving: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
    listener_error: Mutex<Option<tcpserve_core::Error>>,
    user_data: Option<UserData>,
    error_sink: Option<ErrorSink>,
}

/// TCP connection server
///
/// Cheap to clone; all clones drive the same listener and registry, so one
/// clone can `serve` while another calls `close` or `shutdown`. A server
/// serves at most once.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .field("handler", &"<handler>")
            .field("manager", &self.inner.manager)
            .field("local_addr", &self.inner.local_addr.get())
            .field("shutting_down", &self.inner.shutdown.is_fired())
            .finish()
    }
}

impl Server {
    /// Create a new server with the given config and handler
    pub fn new(config: ServerConfig, handler: SharedHandler) -> Self {
        Self::with_parts(config, handler, None, None)
    }

    fn with_parts(
        config: ServerConfig,
        handler: SharedHandler,
        user_data: Option<UserData>,
        error_sink: Option<ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                manager: ConnectionManager::new(),
                shutdown: Signal::new(),
                listener_closed: Signal::new(),
                serving: AtomicBool::new(false),
                local_addr: OnceLock::new(),
                listener_error: Mutex::new(None),
                user_data,
                error_sink,
            }),
        }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Address the listener is bound to, once serving has started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.inner.manager.connection_count().await
    }

    /// Snapshot of the live-connection registry
    pub async fn connections(&self) -> Vec<ConnectionRecord> {
        self.inner.manager.records().await
    }

    /// Registry statistics
    pub async fn stats(&self) -> ManagerStats {
        self.inner.manager.stats().await
    }

    /// Whether `close` or `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_fired()
    }

    /// Bind the configured address and serve.
    ///
    /// Uses TLS when the configuration carries a [`TlsConfig`].
    #[cfg(feature = "tcp-transport")]
    pub async fn listen_and_serve(&self) -> ServerResult<()> {
        let transport = self.bind().await?;

        #[cfg(feature = "tls-transport")]
        if self.inner.config.tls.is_some() {
            let acceptor = self.resolve_tls("", "")?;
            return self.run(transport, Some(acceptor)).await;
        }

        self.run(transport, None).await
    }

    /// Bind the configured address and serve TLS with the given PEM files.
    ///
    /// Empty paths fall back to the configured [`TlsConfig`].
    #[cfg(all(feature = "tcp-transport", feature = "tls-transport"))]
    pub async fn listen_and_serve_tls(&self, cert_file: &str, key_file: &str) -> ServerResult<()> {
        let acceptor = self.resolve_tls(cert_file, key_file)?;
        let transport = self.bind().await?;
        self.run(transport, Some(acceptor)).await
    }

    /// Serve plain connections from an already bound transport
    pub async fn serve<T: Transport>(&self, transport: T) -> ServerResult<()> {
        self.run(transport, None).await
    }

    /// Serve TLS connections from an already bound transport.
    ///
    /// Empty paths fall back to the configured [`TlsConfig`].
    #[cfg(feature = "tls-transport")]
    pub async fn serve_tls<T: Transport>(
        &self,
        transport: T,
        cert_file: &str,
        key_file: &str,
    ) -> ServerResult<()> {
        let acceptor = self.resolve_tls(cert_file, key_file)?;
        self.run(transport, Some(acceptor)).await
    }

    /// Stop accepting and abort every live connection.
    ///
    /// Fires each connection's cancel signal and severs its socket without
    /// waiting for handlers to return. Returns
    /// [`ServerError::AlreadyClosed`] if the listener was already closed;
    /// live connections are still aborted in that case. A failure to close
    /// the listener is returned as well.
    pub async fn close(&self) -> ServerResult<()> {
        let already_closed = !self.inner.shutdown.fire() || self.inner.listener_closed.is_fired();
        info!("closing server");

        self.wait_listener_closed().await;
        let closed = self.inner.manager.cancel_and_close_all().await;
        debug!(closed, "aborted live connections");

        if already_closed {
            return Err(ServerError::AlreadyClosed);
        }
        match self.take_listener_error() {
            Some(e) => Err(ServerError::Core(e)),
            None => Ok(()),
        }
    }

    /// Stop accepting and wait up to `grace` for connections to finish.
    ///
    /// Every live connection's cancel signal is fired; sockets are left
    /// open so handlers can finish cleanly. Once the grace period runs out
    /// the remaining sockets are force-closed and
    /// [`ServerError::DeadlineExceeded`] is returned.
    pub async fn shutdown(&self, grace: Duration) -> ServerResult<()> {
        let deadline = Instant::now() + grace;
        self.inner.shutdown.fire();
        info!(?grace, "shutting down");

        if tokio::time::timeout_at(deadline, self.wait_listener_closed())
            .await
            .is_err()
        {
            warn!("listener still open at shutdown deadline");
        }
        let manager = &self.inner.manager;
        let signalled = manager.signal_all().await;
        debug!(signalled, "signalled live connections");

        loop {
            if manager.is_empty().await {
                info!("shutdown complete");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                let stragglers = manager.records().await;
                for record in &stragglers {
                    debug!(
                        id = record.id,
                        peer = %record.remote_addr,
                        age = ?record.age(),
                        "force-closing connection"
                    );
                }
                let remaining = stragglers.len();
                let closed = manager.close_all().await;
                warn!(remaining, closed, "shutdown deadline exceeded, closed remaining connections");
                return Err(ServerError::DeadlineExceeded { grace, remaining });
            }

            tokio::time::sleep(self.inner.config.drain_interval.min(deadline - now)).await;
        }
    }

    async fn wait_listener_closed(&self) {
        if self.inner.serving.load(Ordering::Acquire) {
            self.inner.listener_closed.fired().await;
        }
    }

    fn take_listener_error(&self) -> Option<tcpserve_core::Error> {
        self.inner
            .listener_error
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
    }

    #[cfg(feature = "tcp-transport")]
    async fn bind(&self) -> ServerResult<tcpserve_transport_tcp::TcpTransport> {
        let addr = self.inner.config.bind_address.clone();
        let bound = tcpserve_transport_tcp::TcpTransport::bind(addr.as_str()).await;
        bound.map_err(|source| ServerError::Bind { addr, source })
    }

    #[cfg(feature = "tls-transport")]
    fn resolve_tls(&self, cert_file: &str, key_file: &str) -> ServerResult<Acceptor> {
        let mut tls = self.inner.config.tls.clone().unwrap_or_default();
        if !cert_file.is_empty() || !key_file.is_empty() {
            tls = tls.with_files(cert_file, key_file);
        }
        Ok(Acceptor::new(tls.build()?))
    }

    async fn run<T: Transport>(&self, transport: T, tls: Option<Acceptor>) -> ServerResult<()> {
        let inner = &self.inner;
        if inner.serving.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyServing);
        }
        let guard = ListenerGuard {
            closed: &inner.listener_closed,
        };
        // declared after the guard so a dropped accept loop releases the
        // listener before reporting it closed
        let transport = transport;

        let local_addr = transport.local_addr()?;
        let _ = inner.local_addr.set(local_addr);
        info!(%local_addr, tls = tls.is_some(), "server listening");

        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = inner.shutdown.fired() => break Ok(()),
                accepted = transport.accept() => accepted,
            };

            match accepted {
                Ok(stream) => self.accept_connection(stream, local_addr, tls.clone()).await,
                Err(_) if inner.shutdown.is_fired() => break Ok(()),
                Err(e) if e.is_transient_accept() => {
                    let backoff = inner.config.accept_backoff;
                    warn!(error = %e, ?backoff, "transient accept error, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(error = %e, "accept failed, stopping server");
                    break Err(ServerError::Accept(e));
                }
            }
        };

        if let Err(e) = transport.close().await {
            warn!(error = %e, "failed to close listener");
            if let Ok(mut slot) = inner.listener_error.lock() {
                *slot = Some(e);
            }
        }
        drop(guard);
        info!(%local_addr, "listener closed");
        result
    }

    async fn accept_connection<S: TransportStream>(
        &self,
        stream: S,
        local_addr: SocketAddr,
        tls: Option<Acceptor>,
    ) {
        let remote_addr = match stream.remote_addr() {
            Ok(addr) => addr,
            Err(e) => {
                debug!(error = %e, "dropping connection without peer address");
                return;
            }
        };

        // registered before the worker exists so shutdown cannot miss it
        let record = self
            .inner
            .manager
            .register(remote_addr, stream.close_handle())
            .await;
        if self.inner.shutdown.is_fired() {
            record.cancel.fire();
        }
        debug!(id = record.id, %remote_addr, "connection accepted");

        let span = debug_span!("connection", id = record.id, peer = %remote_addr);
        let server = self.clone();
        tokio::spawn(
            async move {
                server.run_connection(stream, record, local_addr, tls).await;
            }
            .instrument(span),
        );
    }

    async fn run_connection<S: TransportStream>(
        self,
        stream: S,
        record: ConnectionRecord,
        local_addr: SocketAddr,
        tls: Option<Acceptor>,
    ) {
        let id = record.id;
        let peer = record.remote_addr;

        match upgrade(stream, tls).await {
            Ok((stream, secure)) => {
                let connection = Connection::new(id, peer, local_addr, stream)
                    .with_user_data(self.inner.user_data.clone())
                    .secure(secure);
                self.invoke_handler(connection, &record).await;
            }
            Err(source) => {
                warn!(id, %peer, error = %source, "TLS handshake failed");
                self.report(ServerError::Handshake { id, peer, source });
            }
        }

        if let Err(e) = record.close_handle.close() {
            debug!(id, error = %e, "failed to close connection");
        }
        self.inner.manager.deregister(id).await;
        debug!(id, %peer, "connection closed");
    }

    async fn invoke_handler(&self, connection: Connection, record: &ConnectionRecord) {
        let id = record.id;
        let peer = record.remote_addr;
        let handler = &self.inner.handler;
        let cancel = record.cancel.clone();

        let outcome = AssertUnwindSafe(async move { handler.serve(connection, cancel).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                error!(id, %peer, error = %source, "handler failed");
                self.report(ServerError::Handler { id, peer, source });
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(id, %peer, panic = %message, "handler panicked");
                self.report(ServerError::HandlerPanicked { id, peer, message });
            }
        }
    }

    fn report(&self, err: ServerError) {
        if let Some(sink) = &self.inner.error_sink {
            sink(&err);
        }
    }
}

/// Reports the listener closed when the accept loop exits, including when
/// its future is dropped mid-accept.
struct ListenerGuard<'a> {
    closed: &'a Signal,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.closed.fire();
    }
}

#[cfg(feature = "tls-transport")]
async fn upgrade<S: TransportStream>(
    stream: S,
    tls: Option<Acceptor>,
) -> tcpserve_core::Result<(Box<dyn TransportStream>, bool)> {
    let upgraded: Box<dyn TransportStream> = match tls {
        Some(acceptor) => Box::new(acceptor.accept(stream).await?),
        None => return Ok((Box::new(stream), false)),
    };
    Ok((upgraded, true))
}

#[cfg(not(feature = "tls-transport"))]
async fn upgrade<S: TransportStream>(
    stream: S,
    tls: Option<Acceptor>,
) -> tcpserve_core::Result<(Box<dyn TransportStream>, bool)> {
    match tls {
        Some(acceptor) => match acceptor {},
        None => {
            let stream: Box<dyn TransportStream> = Box::new(stream);
            Ok((stream, false))
        }
    }
}

/// Server builder
#[derive(Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    user_data: Option<UserData>,
    error_sink: Option<ErrorSink>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("user_data", &self.user_data.is_some())
            .field("error_sink", &self.error_sink.is_some())
            .finish()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Address to listen on, `host:port`
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Configure TLS using certificate and key files (requires `tls-transport` feature)
    #[cfg(feature = "tls-transport")]
    pub fn tls(mut self, cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        let tls = self.config.tls.take().unwrap_or_default();
        self.config.tls = Some(tls.with_files(cert_file, key_file));
        self
    }

    /// Configure TLS using a pre-built rustls configuration (requires `tls-transport` feature)
    #[cfg(feature = "tls-transport")]
    pub fn tls_config(mut self, server_config: Arc<rustls::ServerConfig>) -> Self {
        self.config
            .tls
            .get_or_insert_with(TlsConfig::default)
            .server_config = Some(server_config);
        self
    }

    /// Value handed to every connection, see [`Connection::user_data`]
    pub fn user_data<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.user_data = Some(Arc::new(value));
        self
    }

    /// Receive connection-scoped failures
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&ServerError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    /// Pause before retrying a transiently failed accept
    pub fn accept_backoff(mut self, backoff: Duration) -> Self {
        self.config.accept_backoff = backoff;
        self
    }

    /// Registry poll interval during graceful shutdown
    pub fn drain_interval(mut self, interval: Duration) -> Self {
        self.config.drain_interval = interval;
        self
    }

    /// Build the server with a handler
    pub fn build_with_handler<H: Handler>(self, handler: H) -> ServerResult<Server> {
        self.config.validate()?;
        Ok(Server::with_parts(
            self.config,
            Arc::new(handler),
            self.user_data,
            self.error_sink,
        ))
    }
}
