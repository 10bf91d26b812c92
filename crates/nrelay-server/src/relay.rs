//! The relay: configuration, collaborators and hooks shared by every
//! connection, plus the storage-facing half of the protocol handlers.

use crate::config::RelayConfig;
use crate::connection::{Connection, ConnectionRegistry};
use crate::info::{resolve_info, OverwriteInfoHook, RelayInformation, RequestHead};
use crate::latch::EoseLatch;
use crate::listener::ListenerRegistry;
use crate::store::{EventCounter, EventStore};
use nrelay_core::{normalize_reason, Event, Filter, RelayError, RelayMessage, RelayResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Runs once per new connection, before any frame is processed.
pub type OnConnectHook =
    Arc<dyn Fn(Arc<Connection>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Returns `Some(reason)` to refuse an event.
pub type RejectEventHook = Arc<dyn Fn(&Event) -> Option<String> + Send + Sync>;

/// Returns `Some(reason)` to refuse a filter.
pub type RejectFilterHook = Arc<dyn Fn(&Filter) -> Option<String> + Send + Sync>;

const NOT_AUTHOR: &str = "blocked: you are not the author of this event";

pub struct Relay {
    config: RelayConfig,
    store: Arc<dyn EventStore>,
    /// Present only when the store can count (NIP-45).
    counter: Option<Arc<dyn EventCounter>>,
    listeners: ListenerRegistry,
    clients: ConnectionRegistry,
    on_connect: Vec<OnConnectHook>,
    reject_event: Vec<RejectEventHook>,
    reject_filter: Vec<RejectFilterHook>,
    overwrite_info: Vec<OverwriteInfoHook>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Relay {
    pub fn new(config: RelayConfig, store: Arc<dyn EventStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            counter: None,
            listeners: ListenerRegistry::new(),
            clients: ConnectionRegistry::new(),
            on_connect: Vec::new(),
            reject_event: Vec::new(),
            reject_filter: Vec::new(),
            overwrite_info: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn EventCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn on_connect(mut self, hook: OnConnectHook) -> Self {
        self.on_connect.push(hook);
        self
    }

    pub fn reject_event(mut self, hook: RejectEventHook) -> Self {
        self.reject_event.push(hook);
        self
    }

    pub fn reject_filter(mut self, hook: RejectFilterHook) -> Self {
        self.reject_filter.push(hook);
        self
    }

    pub fn overwrite_info(mut self, hook: OverwriteInfoHook) -> Self {
        self.overwrite_info.push(hook);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Public URL used for NIP-42; auth is disabled when unset.
    pub fn service_url(&self) -> Option<&str> {
        self.config.service_url.as_deref()
    }

    pub fn counter(&self) -> Option<&Arc<dyn EventCounter>> {
        self.counter.as_ref()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn clients(&self) -> &ConnectionRegistry {
        &self.clients
    }

    pub fn on_connect_hooks(&self) -> &[OnConnectHook] {
        &self.on_connect
    }

    /// The information document as seen by `request`.
    pub fn info_for(&self, request: &RequestHead) -> RelayInformation {
        resolve_info(&self.config.info, &self.overwrite_info, request)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every read loop to exit.
    pub fn broadcast_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Ingest a verified event: policy hooks, persistence, live fan-out.
    pub async fn add_event(&self, event: &Event) -> RelayResult<()> {
        for hook in &self.reject_event {
            if let Some(reason) = hook(event) {
                return Err(RelayError::Rejected(normalize_reason(&reason, "blocked")));
            }
        }

        if !event.is_ephemeral() {
            self.store.save_event(event).await?;
        }

        self.listeners.notify_listeners(event).await;
        Ok(())
    }

    /// Apply a kind-5 deletion request, then keep the request itself.
    pub async fn handle_delete_request(&self, event: &Event) -> RelayResult<()> {
        let targets = event
            .tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == "e")
            .map(|t| t[1].as_str());

        for id in targets {
            let found = self
                .store
                .query_events(&Filter::new().ids([id]))
                .await?;
            for target in found {
                if target.pubkey != event.pubkey {
                    return Err(RelayError::Rejected(NOT_AUTHOR.to_string()));
                }
                self.store.delete_event(&target).await?;
                debug!(id = %target.id, "event deleted");
            }
        }

        self.add_event(event).await
    }

    /// Stream stored matches for one filter of a REQ.
    ///
    /// `latch` is counted down exactly once on every path; on success that
    /// happens only after the last stored event has been written. A rejected
    /// filter returns the normalized reason and must not be registered.
    pub async fn handle_request(
        &self,
        conn: &Arc<Connection>,
        subscription_id: &str,
        latch: &Arc<EoseLatch>,
        filter: &Filter,
    ) -> RelayResult<()> {
        for hook in &self.reject_filter {
            if let Some(reason) = hook(filter) {
                let reason = normalize_reason(&reason, "blocked");
                conn.reply(&RelayMessage::Notice(reason.clone())).await;
                latch.done();
                return Err(RelayError::Rejected(reason));
            }
        }

        let events = match self.store.query_events(filter).await {
            Ok(events) => events,
            Err(e) => {
                warn!(conn = conn.id(), subscription = %subscription_id, error = %e, "query failed");
                conn.reply(&RelayMessage::Notice(e.to_string())).await;
                latch.done();
                return Ok(());
            }
        };

        let conn = conn.clone();
        let latch = latch.clone();
        let subscription_id = subscription_id.to_string();
        tokio::spawn(async move {
            for event in events {
                let message = RelayMessage::Event {
                    subscription_id: subscription_id.clone(),
                    event: Box::new(event),
                };
                if !conn.reply(&message).await {
                    break;
                }
            }
            latch.done();
        });
        Ok(())
    }

    /// Count matches for one filter of a COUNT. Failures are reported to the
    /// client and count as zero.
    pub async fn handle_count_request(
        &self,
        conn: &Connection,
        counter: &dyn EventCounter,
        filter: &Filter,
    ) -> i64 {
        for hook in &self.reject_filter {
            if let Some(reason) = hook(filter) {
                conn.reply(&RelayMessage::Notice(normalize_reason(&reason, "blocked")))
                    .await;
                return 0;
            }
        }

        match counter.count_events(filter).await {
            Ok(n) => n,
            Err(e) => {
                warn!(conn = conn.id(), error = %e, "count failed");
                conn.reply(&RelayMessage::Notice(e.to_string())).await;
                0
            }
        }
    }
}
