//! Per-connection tasks: the read loop and the keepalive ticker.

use crate::connection::Connection;
use crate::handlers::handle_message;
use crate::relay::Relay;
use futures_util::{Stream, StreamExt};
use nrelay_core::RelayError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout_at, Instant};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

/// Drive one connection until the peer goes away, the read deadline lapses or
/// the relay shuts down.
///
/// `stream` is the read half of the transport; the write half already lives in
/// `conn`. Nothing in the loop waits on a write. On return the connection is deregistered, its transport closed and
/// all of its subscriptions released.
pub async fn serve_connection<R>(relay: Arc<Relay>, conn: Arc<Connection>, mut stream: R)
where
    R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    relay.clients().register(conn.clone()).await;
    info!(conn = conn.id(), remote = ?conn.remote(), "connection opened");

    let mut shutdown_rx = relay.subscribe_shutdown();
    let keepalive_task = tokio::spawn(keepalive(conn.clone(), relay.config().ping_period));

    for hook in relay.on_connect_hooks() {
        hook(conn.clone()).await;
    }

    let pong_wait = relay.config().pong_wait;
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(conn = conn.id(), "shutdown requested");
                break;
            }
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(conn = conn.id(), "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                log_read_error(conn.id(), &e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                tokio::spawn(handle_message(relay.clone(), conn.clone(), text.to_string()));
            }
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => {
                    tokio::spawn(handle_message(relay.clone(), conn.clone(), text));
                }
                Err(_) => trace!(conn = conn.id(), "dropping non-utf8 binary frame"),
            },
            Message::Ping(payload) => {
                let conn = conn.clone();
                tokio::spawn(async move {
                    if let Err(e) = conn.send_frame(Message::Pong(payload)).await {
                        debug!(conn = conn.id(), error = %e, "failed to answer ping");
                    }
                });
            }
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            Message::Close(frame) => {
                let code = frame.as_ref().map(|f| f.code);
                if is_expected_close(code) {
                    debug!(conn = conn.id(), code = ?code, "peer closed");
                } else {
                    warn!(conn = conn.id(), code = ?code, "unexpected close");
                }
                break;
            }
            Message::Frame(_) => {}
        }
    }

    keepalive_task.abort();
    if relay.clients().remove(conn.id()).await.is_some() {
        let released = relay.listeners().remove_listener(conn.id()).await;
        conn.close().await;
        info!(conn = conn.id(), subscriptions = released, "connection closed");
    }
}

/// Send a ping every `period` until a write fails.
pub async fn keepalive(conn: Arc<Connection>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        match conn.send_frame(Message::Ping(Vec::new().into())).await {
            Ok(()) => trace!(conn = conn.id(), "ping"),
            Err(RelayError::ConnectionClosed) => return,
            Err(e) => {
                warn!(conn = conn.id(), error = %e, "error writing ping, stopping keepalive");
                return;
            }
        }
    }
}

/// Normal closure, going away, no status and abnormal closure.
fn is_expected_close(code: Option<CloseCode>) -> bool {
    matches!(
        code,
        None | Some(CloseCode::Normal | CloseCode::Away | CloseCode::Status | CloseCode::Abnormal)
    )
}

fn log_read_error(conn: u64, e: &WsError) {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            debug!(conn, error = %e, "connection dropped");
        }
        other => warn!(conn, error = %other, "read error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::store::MemoryStore;
    use crate::testutil::{signed, FailMode, RecordingSink};
    use futures_util::stream;
    use nrelay_core::{Filter, RelayMessage};
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;

    fn relay_with(config: RelayConfig) -> Arc<Relay> {
        Arc::new(Relay::new(config, Arc::new(MemoryStore::new())))
    }

    fn new_conn(relay: &Relay) -> (Arc<Connection>, RecordingSink) {
        let sink = RecordingSink::new();
        let conn = Arc::new(Connection::new(
            relay.clients().next_id(),
            None,
            Box::new(sink.clone()),
        ));
        (conn, sink)
    }

    fn text(value: serde_json::Value) -> Result<Message, WsError> {
        Ok(Message::text(value.to_string()))
    }

    #[tokio::test]
    async fn dispatches_frames_and_cleans_up_on_end() {
        let relay = relay_with(RelayConfig::default());
        let (conn, sink) = new_conn(&relay);
        let event = signed(1, "hi", 1, vec![]);
        let frames = vec![
            text(json!(["REQ", "s", {}])),
            text(json!(["EVENT", event])),
            Ok(Message::text("garbage")),
        ];

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let input = stream::iter(frames).chain(stream::once(async move {
            let _ = rx.await;
            Err(WsError::ConnectionClosed)
        }));
        let served = tokio::spawn(serve_connection(relay.clone(), conn.clone(), Box::pin(input)));

        sink.wait_for(|f| {
            f.iter().any(|v| v[0] == "OK") && f.iter().any(|v| v[0] == "EOSE")
        })
        .await;
        assert!(relay.clients().contains(conn.id()).await);
        assert!(relay.listeners().has_subscription(conn.id(), "s").await);

        tx.send(()).unwrap();
        served.await.unwrap();

        assert!(!relay.clients().contains(conn.id()).await);
        assert_eq!(relay.listeners().subscription_count(conn.id()).await, 0);
        assert!(conn.is_closed());
        assert_eq!(sink.close_count(), 1);
    }

    #[tokio::test]
    async fn pings_are_answered_inline() {
        let relay = relay_with(RelayConfig::default());
        let (conn, sink) = new_conn(&relay);
        let input = stream::iter(vec![
            Ok(Message::Ping(b"abc".to_vec().into())),
            Ok(Message::Close(None)),
        ]);

        serve_connection(relay, conn, input).await;

        assert!(sink
            .frames()
            .iter()
            .any(|m| matches!(m, Message::Pong(p) if p[..] == b"abc"[..])));
    }

    #[tokio::test]
    async fn on_connect_hooks_run_before_frames() {
        let relay = Arc::new(
            Relay::new(RelayConfig::default(), Arc::new(MemoryStore::new())).on_connect(Arc::new(
                |conn: Arc<Connection>| {
                    Box::pin(async move {
                        conn.reply(&RelayMessage::Notice("welcome".into())).await;
                    }) as Pin<Box<dyn Future<Output = ()> + Send>>
                },
            )),
        );
        let (conn, sink) = new_conn(&relay);
        let input = stream::iter(vec![text(json!(["COUNT", "c", {}]))])
            .chain(stream::pending::<Result<Message, WsError>>());
        let served = tokio::spawn(serve_connection(relay.clone(), conn, input));

        let frames = sink.wait_for(|f| f.len() == 2).await;
        assert_eq!(frames[0], json!(["NOTICE", "welcome"]));
        assert_eq!(frames[1][0], "CLOSED");

        relay.broadcast_shutdown();
        served.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_subscriptions() {
        let relay = relay_with(RelayConfig::default());
        let (conn, sink) = new_conn(&relay);
        let input = stream::iter(vec![text(json!(["REQ", "s", {"kinds": [1]}]))])
            .chain(stream::pending::<Result<Message, WsError>>());
        let served = tokio::spawn(serve_connection(relay.clone(), conn.clone(), input));
        sink.wait_for(|f| f.iter().any(|v| v[0] == "EOSE")).await;

        relay.broadcast_shutdown();
        served.await.unwrap();

        assert_eq!(relay.clients().count().await, 0);
        assert_eq!(
            relay.listeners().filters(conn.id(), "s").await,
            None::<Vec<Filter>>
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_hits_read_deadline() {
        let config = RelayConfig {
            ping_period: Duration::from_secs(1),
            pong_wait: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        let relay = relay_with(config);
        let (conn, sink) = new_conn(&relay);

        serve_connection(relay.clone(), conn, stream::pending::<Result<Message, WsError>>()).await;

        assert_eq!(relay.clients().count().await, 0);
        let pings = sink
            .frames()
            .iter()
            .filter(|m| matches!(m, Message::Ping(_)))
            .count();
        assert!(pings >= 2, "expected pings before the deadline, got {pings}");
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_extend_the_deadline() {
        let config = RelayConfig {
            ping_period: Duration::from_secs(1),
            pong_wait: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        let relay = relay_with(config);
        let (conn, _sink) = new_conn(&relay);
        let pongs = stream::unfold(0u32, |n| async move {
            if n == 5 {
                return None;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            Some((Ok(Message::Pong(Vec::new().into())), n + 1))
        })
        .chain(stream::pending::<Result<Message, WsError>>());

        let started = Instant::now();
        serve_connection(relay, conn, Box::pin(pongs)).await;

        assert!(started.elapsed() >= Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_does_not_block_shutdown() {
        let config = RelayConfig {
            ping_period: Duration::from_secs(1),
            pong_wait: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        let relay = relay_with(config);
        let sink = RecordingSink::failing(FailMode::Stuck);
        let conn = Arc::new(Connection::new(1, None, Box::new(sink)));
        let input = stream::iter(vec![Ok(Message::Ping(b"hi".to_vec().into()))])
            .chain(stream::pending::<Result<Message, WsError>>());
        let served = tokio::spawn(serve_connection(relay.clone(), conn.clone(), input));

        tokio::time::sleep(Duration::from_secs(2)).await;
        relay.broadcast_shutdown();

        tokio::time::timeout(Duration::from_secs(60), served)
            .await
            .expect("read loop stuck behind a stalled write")
            .unwrap();
        assert_eq!(relay.clients().count().await, 0);
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_still_hits_read_deadline() {
        let config = RelayConfig {
            ping_period: Duration::from_secs(1),
            pong_wait: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        let relay = relay_with(config);
        let conn = Arc::new(Connection::new(
            1,
            None,
            Box::new(RecordingSink::failing(FailMode::Stuck)),
        ));
        let input = stream::iter(vec![Ok(Message::Ping(Vec::new().into()))])
            .chain(stream::pending::<Result<Message, WsError>>());

        tokio::time::timeout(
            Duration::from_secs(60),
            serve_connection(relay.clone(), conn, input),
        )
        .await
        .expect("read deadline never fired");
        assert_eq!(relay.clients().count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_stops_on_write_failure() {
        for mode in [FailMode::Closed, FailMode::Transport] {
            let sink = RecordingSink::failing(mode);
            let conn = Arc::new(Connection::new(1, None, Box::new(sink.clone())));
            tokio::time::timeout(
                Duration::from_secs(5),
                keepalive(conn, Duration::from_secs(1)),
            )
            .await
            .unwrap();
            assert!(sink.frames().is_empty());
        }
    }

    #[test]
    fn expected_close_codes() {
        assert!(is_expected_close(None));
        assert!(is_expected_close(Some(CloseCode::Normal)));
        assert!(is_expected_close(Some(CloseCode::Away)));
        assert!(!is_expected_close(Some(CloseCode::Protocol)));
    }
}
