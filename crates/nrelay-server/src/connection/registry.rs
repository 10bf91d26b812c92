//! Process-wide registry of live connections.

use super::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Live connections indexed by connection id.
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a connection id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        let id = conn.id();
        self.clients.write().await.insert(id, conn);
        debug!(conn = id, "connection registered");
    }

    /// Remove a connection; `None` if it was already removed.
    pub async fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        let removed = self.clients.write().await.remove(&id);
        if removed.is_some() {
            debug!(conn = id, "connection deregistered");
        }
        removed
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
