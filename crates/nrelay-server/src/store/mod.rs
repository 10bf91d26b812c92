//! Storage collaborators.
//!
//! The relay core never touches persistence directly; it calls an
//! [`EventStore`] to save, delete and query events, and an optional
//! [`EventCounter`] for NIP-45 counts. A relay built without a counter
//! answers `COUNT` with an "unsupported" `CLOSED`.

pub mod memory;

pub use memory::MemoryStore;

use nrelay_core::{Event, Filter, RelayResult};
use std::future::Future;
use std::pin::Pin;

/// Event persistence used for ingestion, deletion and catch-up queries.
pub trait EventStore: Send + Sync {
    /// Persist an event. Saving an event that is already stored succeeds.
    fn save_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + 'a>>;

    /// Remove a previously stored event.
    fn delete_event<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + 'a>>;

    /// Stored events matching `filter`, newest first.
    fn query_events<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> Pin<Box<dyn Future<Output = RelayResult<Vec<Event>>> + Send + 'a>>;
}

/// Optional NIP-45 capability.
pub trait EventCounter: Send + Sync {
    fn count_events<'a>(
        &'a self,
        filter: &'a Filter,
    ) -> Pin<Box<dyn Future<Output = RelayResult<i64>> + Send + 'a>>;
}
