//! In-memory event store, used by the default binary and by tests.

use super::{EventCounter, EventStore};
use nrelay_core::{Event, Filter, RelayError, RelayResult};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::debug;

/// Volatile store keeping every event in a vector.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<Vec<Event>>,
    /// Refuse new events once this many are held.
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::default(),
            capacity: Some(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.events.read().await.iter().any(|e| e.id == id)
    }
}

impl EventStore for MemoryStore {
    fn save_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut events = self.events.write().await;
            if events.iter().any(|e| e.id == event.id) {
                debug!(id = %event.id, "duplicate event ignored");
                return Ok(());
            }
            if let Some(capacity) = self.capacity.filter(|c| events.len() >= *c) {
                return Err(RelayError::Storage(format!(
                    "store is full ({capacity} events)"
                )));
            }
            events.push(event.clone());
            Ok(())
        })
    }

    fn delete_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.events.write().await.retain(|e| e.id != event.id);
            Ok(())
        })
    }

    fn query_events<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> Pin<Box<dyn Future<Output = RelayResult<Vec<Event>>> + Send + 'a>> {
        Box::pin(async move {
            let events = self.events.read().await;
            let mut matched: Vec<Event> =
                events.iter().filter(|e| filter.matches(e)).cloned().collect();
            matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            if let Some(limit) = filter.limit {
                matched.truncate(limit);
            }
            Ok(matched)
        })
    }
}

impl EventCounter for MemoryStore {
    fn count_events<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> Pin<Box<dyn Future<Output = RelayResult<i64>> + Send + 'a>> {
        Box::pin(async move {
            let events = self.events.read().await;
            Ok(events.iter().filter(|e| filter.matches(e)).count() as i64)
        })
    }
}
