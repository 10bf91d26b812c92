//! Per-connection state.
//!
//! A [`Connection`] is created when a WebSocket upgrade completes and lives
//! until its read loop exits. It owns the write half of the transport (behind
//! a [`SerializedWriter`]), the NIP-42 challenge, and the write-once auth
//! identity with its completion signal.

pub mod registry;
pub mod writer;

pub use registry::ConnectionRegistry;
pub use writer::{FrameSink, SerializedWriter};

use nrelay_core::{RelayError, RelayMessage, RelayResult};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Length of the random challenge in bytes (hex-encoded on the wire).
const CHALLENGE_LEN: usize = 8;

/// Longest wait for the close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A live client connection.
pub struct Connection {
    id: u64,
    remote: Option<SocketAddr>,
    challenge: String,
    /// Set at most once, by the auth handler.
    authed: OnceLock<String>,
    /// Flips to `true` exactly once, when `authed` is set.
    auth_signal: watch::Sender<bool>,
    writer: SerializedWriter,
}

impl Connection {
    /// Create a connection with a fresh random challenge.
    pub fn new(id: u64, remote: Option<SocketAddr>, sink: Box<dyn FrameSink>) -> Self {
        let (auth_signal, _) = watch::channel(false);
        Self {
            id,
            remote,
            challenge: generate_challenge(),
            authed: OnceLock::new(),
            auth_signal,
            writer: SerializedWriter::new(sink),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// The NIP-42 challenge issued to this connection.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// The authenticated pubkey, if auth has succeeded.
    pub fn authed_pubkey(&self) -> Option<&str> {
        self.authed.get().map(String::as_str)
    }

    /// Whether the auth completion signal has fired.
    pub fn auth_fired(&self) -> bool {
        *self.auth_signal.borrow()
    }

    /// Record the authenticated pubkey and fire the completion signal.
    ///
    /// Returns `true` only for the first call; later calls leave the recorded
    /// identity and the signal untouched.
    pub(crate) fn set_authed(&self, pubkey: String) -> bool {
        if self.authed.set(pubkey).is_err() {
            return false;
        }
        self.auth_signal.send_replace(true);
        true
    }

    /// Wait until this connection authenticates, then return its pubkey.
    ///
    /// No timeout is applied; callers that need one wrap this in
    /// `tokio::time::timeout`.
    pub async fn authenticated(&self) -> Option<String> {
        let mut rx = self.auth_signal.subscribe();
        rx.wait_for(|fired| *fired).await.ok()?;
        self.authed.get().cloned()
    }

    /// Encode and write a relay envelope.
    pub async fn send(&self, message: &RelayMessage) -> RelayResult<()> {
        self.writer.send(Message::text(message.to_json())).await
    }

    /// Like [`send`](Self::send), but logs a failed write instead of
    /// returning it. Returns whether the write succeeded.
    pub async fn reply(&self, message: &RelayMessage) -> bool {
        match self.send(message).await {
            Ok(()) => true,
            Err(RelayError::ConnectionClosed) => {
                debug!(conn = self.id, kind = message.label(), "dropping reply on closed connection");
                false
            }
            Err(e) => {
                warn!(conn = self.id, kind = message.label(), error = %e, "failed to write reply");
                false
            }
        }
    }

    /// Write a raw frame (pings, pongs).
    pub async fn send_frame(&self, frame: Message) -> RelayResult<()> {
        self.writer.send(frame).await
    }

    /// Close the transport if it is still open.
    ///
    /// Gives up after [`CLOSE_TIMEOUT`] when a stalled write holds the sink.
    pub async fn close(&self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn = self.id, error = %e, "error closing websocket"),
            Err(_) => debug!(conn = self.id, "timed out closing websocket"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

fn generate_challenge() -> String {
    let bytes: [u8; CHALLENGE_LEN] = rand::thread_rng().gen();
    hex::encode(bytes)
}
