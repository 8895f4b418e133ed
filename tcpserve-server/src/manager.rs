//! Live-connection registry
//!
//! Every accepted connection is registered here before its worker starts
//! and removed when the worker finishes. Shutdown uses the registry to
//! signal cooperative handlers and to force-close whatever is left.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tcpserve_core::transport::CloseHandle;
use tcpserve_core::Signal;
use tokio::sync::RwLock;

/// Connection manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Connections currently registered
    pub active_connections: usize,
    /// Connections registered since the server started
    pub total_connections: u64,
    /// Highest number of simultaneously registered connections
    pub peak_connections: usize,
}

/// Registry entry for one live connection
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    /// Connection id
    pub id: u64,
    /// Client address
    pub remote_addr: SocketAddr,
    /// Fired when the server asks the handler to stop
    pub cancel: Signal,
    /// Severs the socket when the handler does not stop in time
    pub close_handle: CloseHandle,
    /// When the connection was registered
    pub registered_at: Instant,
}

impl ConnectionRecord {
    /// How long the connection has been registered
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }
}

/// Connection manager
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<u64, ConnectionRecord>>,
    next_id: AtomicU64,
    total: AtomicU64,
    peak: AtomicUsize,
}

impl ConnectionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning its record.
    ///
    /// Ids start at 1 and are never reused.
    pub async fn register(
        &self,
        remote_addr: SocketAddr,
        close_handle: CloseHandle,
    ) -> ConnectionRecord {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = ConnectionRecord {
            id,
            remote_addr,
            cancel: Signal::new(),
            close_handle,
            registered_at: Instant::now(),
        };

        let active = {
            let mut connections = self.connections.write().await;
            connections.insert(id, record.clone());
            connections.len()
        };
        self.total.fetch_add(1, Ordering::Relaxed);
        self.peak.fetch_max(active, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("tcpserve_server_active_connections").set(active as f64);
            metrics::counter!("tcpserve_server_connections_opened_total").increment(1);
        }

        tracing::trace!(id, %remote_addr, active, "connection registered");
        record
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub async fn deregister(&self, id: u64) -> bool {
        let (removed, active) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };

        if removed {
            #[cfg(feature = "metrics")]
            {
                metrics::gauge!("tcpserve_server_active_connections").set(active as f64);
                metrics::counter!("tcpserve_server_connections_closed_total").increment(1);
            }
            tracing::trace!(id, active, "connection deregistered");
        }
        removed
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are registered
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Snapshot of all registered connections
    pub async fn records(&self) -> Vec<ConnectionRecord> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Fire the cancel signal of every registered connection.
    ///
    /// Returns how many were signalled for the first time.
    pub async fn signal_all(&self) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|record| record.cancel.fire())
            .count()
    }

    /// Force-close every registered socket, returning how many were closed.
    ///
    /// Records stay registered until their workers finish.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections.read().await;
        let mut closed = 0;
        for record in connections.values() {
            match record.close_handle.close() {
                Ok(()) => closed += 1,
                Err(e) => {
                    tracing::debug!(id = record.id, error = %e, "failed to close connection")
                }
            }
        }
        closed
    }

    /// Signal and force-close every registered connection
    pub async fn cancel_and_close_all(&self) -> usize {
        self.signal_all().await;
        self.close_all().await
    }

    /// Registry statistics
    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            active_connections: self.connection_count().await,
            total_connections: self.total.load(Ordering::Relaxed),
            peak_connections: self.peak.load(Ordering::Relaxed),
        }
    }
}
