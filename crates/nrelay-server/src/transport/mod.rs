//! Network transports.
//!
//! Plain TCP + WebSocket only; TLS is expected to be terminated in front of
//! the relay.

pub mod websocket;
