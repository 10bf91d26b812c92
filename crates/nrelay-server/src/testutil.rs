//! Shared fixtures for unit tests.

use crate::connection::{Connection, FrameSink};
use crate::relay::Relay;
use crate::store::MemoryStore;
use nrelay_core::{Event, EventTemplate, RelayError, RelayResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

pub const SECRET: [u8; 32] = [0x11; 32];
pub const OTHER_SECRET: [u8; 32] = [0x22; 32];

#[derive(Clone, Copy)]
pub enum FailMode {
    Closed,
    Transport,
    /// Writes never complete, like a peer that stopped reading.
    Stuck,
}

#[derive(Default)]
struct SinkState {
    frames: Vec<Message>,
    closes: usize,
}

/// In-memory [`FrameSink`] that records everything written to it.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
    log: Arc<Mutex<Vec<String>>>,
    split_writes: bool,
    fail: Option<FailMode>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each write yields between logging its start and its end.
    pub fn with_split_writes() -> Self {
        Self {
            split_writes: true,
            ..Self::default()
        }
    }

    /// Every write fails with `mode`.
    pub fn failing(mode: FailMode) -> Self {
        Self {
            fail: Some(mode),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn frames(&self) -> Vec<Message> {
        self.state.lock().unwrap().frames.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.to_string()),
                _ => None,
            })
            .collect()
    }

    pub fn json_frames(&self) -> Vec<serde_json::Value> {
        self.texts()
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }

    /// JSON frames whose label (first element) equals `label`.
    pub fn labelled(&self, label: &str) -> Vec<serde_json::Value> {
        self.json_frames()
            .into_iter()
            .filter(|v| v[0] == label)
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Poll until `pred` holds for the recorded JSON frames.
    pub async fn wait_for<F>(&self, pred: F) -> Vec<serde_json::Value>
    where
        F: Fn(&[serde_json::Value]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let frames = self.json_frames();
            if pred(frames.as_slice()) {
                return frames;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for frames, got {frames:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(
        &mut self,
        frame: Message,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            match self.fail {
                Some(FailMode::Closed) => return Err(RelayError::ConnectionClosed),
                Some(FailMode::Transport) => {
                    return Err(RelayError::Transport("broken pipe".into()))
                }
                Some(FailMode::Stuck) => std::future::pending::<()>().await,
                None => {}
            }
            if self.split_writes {
                let text = frame.to_text().unwrap_or_default().to_string();
                self.log.lock().unwrap().push(format!("begin:{text}"));
                tokio::task::yield_now().await;
                self.log.lock().unwrap().push(format!("end:{text}"));
            }
            self.state.lock().unwrap().frames.push(frame);
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.state.lock().unwrap().closes += 1;
            Ok(())
        })
    }
}

/// An event signed with [`SECRET`].
pub fn signed(kind: u16, content: &str, created_at: u64, tags: Vec<Vec<String>>) -> Event {
    signed_with(&SECRET, kind, content, created_at, tags)
}

pub fn signed_with(
    secret: &[u8; 32],
    kind: u16,
    content: &str,
    created_at: u64,
    tags: Vec<Vec<String>>,
) -> Event {
    Event::sign(
        EventTemplate {
            created_at,
            kind,
            tags,
            content: content.to_string(),
        },
        secret,
    )
    .unwrap()
}

pub fn tag(name: &str, value: &str) -> Vec<String> {
    vec![name.to_string(), value.to_string()]
}

/// A relay backed by a [`MemoryStore`] that also counts.
pub fn memory_relay() -> (Relay, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let relay = Relay::new(Default::default(), store.clone()).with_counter(store.clone());
    (relay, store)
}

/// A registered connection with a recording sink.
pub async fn connect(relay: &Relay) -> (Arc<Connection>, RecordingSink) {
    let sink = RecordingSink::new();
    let conn = Arc::new(Connection::new(
        relay.clients().next_id(),
        None,
        Box::new(sink.clone()),
    ));
    relay.clients().register(conn.clone()).await;
    (conn, sink)
}
