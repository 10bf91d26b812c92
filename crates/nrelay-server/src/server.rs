//! Accept loop and shutdown for a [`Relay`].

use crate::connection::Connection;
use crate::info::render_info_response;
use crate::relay::Relay;
use crate::session::serve_connection;
use crate::transport::websocket;
use futures_util::StreamExt;
use nrelay_core::RelayResult;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// How long [`Relay::shutdown`] waits for connections to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

impl Relay {
    /// Accept connections until the task is dropped.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> RelayResult<()> {
        info!(addr = ?listener.local_addr().ok(), "relay accepting connections");
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let relay = self.clone();
                    tokio::spawn(async move {
                        relay.handle_stream(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }

    async fn handle_stream(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let head = match websocket::peek_request_head(&stream).await {
            Ok(head) => head,
            Err(e) => {
                debug!(remote = %addr, error = %e, "failed to read request head");
                return;
            }
        };

        if let Some((request, head_len)) = head.filter(|(request, _)| request.wants_info()) {
            let info = self.info_for(&request);
            let result = match render_info_response(&info) {
                Ok(response) => websocket::write_http_response(stream, head_len, &response).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                debug!(remote = %addr, error = %e, "failed to serve relay information");
            }
            return;
        }

        let ws = match websocket::upgrade(stream, self.config().max_message_size).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (sink, stream) = ws.split();
        let conn = Arc::new(Connection::new(
            self.clients().next_id(),
            Some(addr),
            Box::new(sink),
        ));
        serve_connection(self, conn, stream).await;
    }

    /// Stop every connection and wait briefly for them to finish.
    pub async fn shutdown(&self) {
        let open = self.clients().count().await;
        info!(connections = open, "shutting down relay");
        self.broadcast_shutdown();

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.clients().count().await > 0 {
            if Instant::now() >= deadline {
                warn!(
                    connections = self.clients().count().await,
                    "connections still open after shutdown grace period"
                );
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}
