//! Live subscription listeners.
//!
//! Registrations are keyed by connection id and subscription id. The registry
//! only holds weak references to connections; dropping the last strong
//! reference elsewhere is enough for a connection to go away, and stale
//! entries are skipped until the read loop's cleanup removes them.

use crate::connection::Connection;
use nrelay_core::{Event, Filter, RelayMessage};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, trace};

struct Listener {
    conn: Weak<Connection>,
    filters: Vec<Filter>,
}

/// Registry of subscriptions awaiting live events.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<u64, HashMap<String, Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `filters` under `subscription_id`, replacing any previous
    /// registration with the same id on this connection.
    pub async fn set_listener(
        &self,
        subscription_id: &str,
        conn: &Arc<Connection>,
        filters: Vec<Filter>,
    ) {
        let mut listeners = self.listeners.write().await;
        listeners.entry(conn.id()).or_default().insert(
            subscription_id.to_string(),
            Listener {
                conn: Arc::downgrade(conn),
                filters,
            },
        );
        debug!(conn = conn.id(), subscription = %subscription_id, "listener set");
    }

    /// Remove one subscription. Returns whether it existed.
    pub async fn remove_listener_id(&self, conn_id: u64, subscription_id: &str) -> bool {
        let mut listeners = self.listeners.write().await;
        let Some(subs) = listeners.get_mut(&conn_id) else {
            return false;
        };
        let removed = subs.remove(subscription_id).is_some();
        if subs.is_empty() {
            listeners.remove(&conn_id);
        }
        if removed {
            debug!(conn = conn_id, subscription = %subscription_id, "listener removed");
        }
        removed
    }

    /// Remove every subscription of a connection. Returns how many were removed.
    pub async fn remove_listener(&self, conn_id: u64) -> usize {
        let removed = self
            .listeners
            .write()
            .await
            .remove(&conn_id)
            .map(|subs| subs.len())
            .unwrap_or(0);
        if removed > 0 {
            debug!(conn = conn_id, count = removed, "listeners released");
        }
        removed
    }

    pub async fn has_subscription(&self, conn_id: u64, subscription_id: &str) -> bool {
        self.listeners
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|subs| subs.contains_key(subscription_id))
    }

    /// Filters registered under a subscription.
    pub async fn filters(&self, conn_id: u64, subscription_id: &str) -> Option<Vec<Filter>> {
        self.listeners
            .read()
            .await
            .get(&conn_id)
            .and_then(|subs| subs.get(subscription_id))
            .map(|l| l.filters.clone())
    }

    pub async fn subscription_count(&self, conn_id: u64) -> usize {
        self.listeners
            .read()
            .await
            .get(&conn_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Push `event` to every subscription with a matching filter.
    ///
    /// Targets are collected under the read lock and written to after it is
    /// released, so a slow client never blocks registration.
    pub async fn notify_listeners(&self, event: &Event) {
        let targets: Vec<(Arc<Connection>, String)> = {
            let listeners = self.listeners.read().await;
            listeners
                .values()
                .flat_map(|subs| subs.iter())
                .filter(|(_, l)| l.filters.iter().any(|f| f.matches(event)))
                .filter_map(|(sub_id, l)| l.conn.upgrade().map(|c| (c, sub_id.clone())))
                .collect()
        };

        for (conn, subscription_id) in targets {
            let message = RelayMessage::Event {
                subscription_id,
                event: Box::new(event.clone()),
            };
            if let Err(e) = conn.send(&message).await {
                trace!(conn = conn.id(), error = %e, "failed to push live event");
            }
        }
    }
}
