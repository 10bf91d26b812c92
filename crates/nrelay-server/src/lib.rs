//! nrelay-server: connection handling and protocol dispatch for a nostr relay.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod info;
pub mod latch;
pub mod listener;
pub mod relay;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use config::RelayConfig;
pub use connection::{Connection, ConnectionRegistry};
pub use relay::{OnConnectHook, Relay, RejectEventHook, RejectFilterHook};
pub use store::{EventCounter, EventStore, MemoryStore};
