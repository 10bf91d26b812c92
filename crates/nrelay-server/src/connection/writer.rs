//! Serialized writer: the only path from a connection's tasks to its socket.
//!
//! Per-message handlers, the keepalive task and spawned EOSE/streaming tasks
//! all write to the same transport concurrently. Every frame goes through one
//! async mutex, so a frame is fully handed to the sink before the next one
//! starts.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use nrelay_core::{RelayError, RelayResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Write half of a framed transport.
pub trait FrameSink: Send {
    /// Write one complete frame.
    fn send_frame(
        &mut self,
        frame: Message,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>>;

    /// Send a close frame and shut the write half.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>>;
}

impl<S> FrameSink for SplitSink<WebSocketStream<S>, Message>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send_frame(
        &mut self,
        frame: Message,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move { self.send(frame).await.map_err(map_ws_error) })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move { SinkExt::close(self).await.map_err(map_ws_error) })
    }
}

/// Map a tungstenite error, folding the "already closed" cases into
/// [`RelayError::ConnectionClosed`].
pub fn map_ws_error(e: WsError) -> RelayError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::ConnectionClosed,
        other => RelayError::Transport(other.to_string()),
    }
}

/// Mutex-gated writer owned by a [`Connection`](super::Connection).
pub struct SerializedWriter {
    sink: Mutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
}

impl SerializedWriter {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Write one frame; waits for any in-flight frame to finish first.
    pub async fn send(&self, frame: Message) -> RelayResult<()> {
        let mut sink = self.sink.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::ConnectionClosed);
        }
        sink.send_frame(frame).await
    }

    /// Close the transport once; later calls and later writes see
    /// [`RelayError::ConnectionClosed`].
    ///
    /// The closed flag is set before waiting for an in-flight frame, so
    /// queued writers fail fast even if that frame never finishes.
    pub async fn close(&self) -> RelayResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sink.lock().await.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
