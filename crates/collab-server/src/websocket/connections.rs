//! Registry of every live connection, used for liveness sweeps, health
//! counts and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use super::connection::Connection;

/// All live connections keyed by connection id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection.
    pub async fn add(&self, connection: Arc<Connection>) {
        let id = connection.id.clone();
        let _ = self.connections.write().await.insert(id.clone(), connection);
        debug!(connection_id = %id, "connection registered");
    }

    /// Unregister a connection. Returns it if it was present, so only the
    /// first caller runs teardown.
    pub async fn remove(&self, connection_id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.write().await.remove(connection_id);
        if removed.is_some() {
            debug!(connection_id, "connection unregistered");
        }
        removed
    }

    /// Look up a connection.
    pub async fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Snapshot of every live connection.
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Connections with no heartbeat for at least `timeout`.
    pub async fn idle(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.idle_for() >= timeout)
            .cloned()
            .collect()
    }

    /// Close every live connection. Their session tasks run teardown.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections.read().await;
        for connection in connections.values() {
            connection.close();
        }
        connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
