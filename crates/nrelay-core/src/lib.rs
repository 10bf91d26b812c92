//! nrelay-core: Shared protocol library for the nrelay nostr relay.
//!
//! Provides the signed event model, NIP-01 filters, client/relay envelopes
//! with their JSON wire codec, and NIP-42 auth event validation.

pub mod error;
pub mod event;
pub mod filter;
pub mod message;
pub mod nip42;

// Re-export commonly used items at crate root.
pub use error::{RelayError, RelayResult};
pub use event::{Event, EventTemplate, KIND_CLIENT_AUTH, KIND_DELETION};
pub use filter::Filter;
pub use message::{normalize_reason, ClientMessage, RelayMessage};
pub use nip42::validate_auth_event;
