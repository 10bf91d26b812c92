//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted TCP stream is peeked first: a plain request for the
//! information document is answered over HTTP and closed, everything else is
//! upgraded.

use crate::info::RequestHead;
use nrelay_core::{RelayError, RelayResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

/// Largest request head we are willing to inspect.
const MAX_HEAD_SIZE: usize = 8192;

/// How long a client may take to send its request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const PEEK_RETRY: Duration = Duration::from_millis(10);

pub async fn bind(addr: SocketAddr) -> RelayResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;
    info!(addr = %addr, "WebSocket listener started");
    Ok(listener)
}

/// Peek at the request head without consuming it.
///
/// Returns the parsed head and its length in bytes (including the blank
/// line), or `None` if the head is oversized, malformed or too slow.
pub async fn peek_request_head(stream: &TcpStream) -> RelayResult<Option<(RequestHead, usize)>> {
    let deadline = Instant::now() + HEAD_TIMEOUT;
    let mut buf = vec![0u8; MAX_HEAD_SIZE];

    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(end) = find_head_end(&buf[..n]) {
            return Ok(RequestHead::parse(&buf[..end]).map(|head| (head, end)));
        }
        if n == buf.len() || Instant::now() >= deadline {
            debug!(bytes = n, "request head incomplete");
            return Ok(None);
        }
        sleep(PEEK_RETRY).await;
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Consume the `head_len` bytes of the request and answer with `response`.
pub async fn write_http_response(
    mut stream: TcpStream,
    head_len: usize,
    response: &str,
) -> RelayResult<()> {
    let mut head = vec![0u8; head_len];
    stream.read_exact(&mut head).await?;
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Complete the WebSocket handshake with an inbound size limit.
pub async fn upgrade(
    stream: TcpStream,
    max_message_size: usize,
) -> RelayResult<WebSocketStream<TcpStream>> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    tokio_tungstenite::accept_async_with_config(stream, Some(config))
        .await
        .map_err(|e| RelayError::Transport(format!("WS handshake failed: {e}")))
}
