//! Message dispatcher: one call per inbound frame, run on its own task.

use crate::connection::Connection;
use crate::latch::EoseLatch;
use crate::relay::Relay;
use nrelay_core::{
    normalize_reason, validate_auth_event, ClientMessage, Event, Filter, RelayMessage,
    KIND_DELETION,
};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Decode `text` and run the matching protocol handler.
///
/// Frames that are not a known client envelope are dropped without a reply.
pub async fn handle_message(relay: Arc<Relay>, conn: Arc<Connection>, text: String) {
    let Some(message) = ClientMessage::parse(&text) else {
        trace!(conn = conn.id(), "dropping undecodable frame");
        return;
    };
    trace!(conn = conn.id(), kind = message.label(), "dispatching");

    match message {
        ClientMessage::Event(event) => handle_event(&relay, &conn, &event).await,
        ClientMessage::Req {
            subscription_id,
            filters,
        } => handle_req(&relay, &conn, subscription_id, filters).await,
        ClientMessage::Close(subscription_id) => {
            relay
                .listeners()
                .remove_listener_id(conn.id(), &subscription_id)
                .await;
        }
        ClientMessage::Auth(event) => handle_auth(&relay, &conn, &event).await,
        ClientMessage::Count {
            subscription_id,
            filters,
        } => handle_count(&relay, &conn, &subscription_id, &filters).await,
    }
}

async fn handle_event(relay: &Relay, conn: &Connection, event: &Event) {
    if !event.check_id() {
        conn.reply(&RelayMessage::ok(
            &event.id,
            false,
            "invalid: id is computed incorrectly",
        ))
        .await;
        return;
    }

    match event.check_signature() {
        Err(e) => {
            debug!(conn = conn.id(), id = %event.id, error = %e, "signature check failed");
            conn.reply(&RelayMessage::ok(
                &event.id,
                false,
                "error: failed to verify signature",
            ))
            .await;
            return;
        }
        Ok(false) => {
            conn.reply(&RelayMessage::ok(&event.id, false, "invalid: signature is invalid"))
                .await;
            return;
        }
        Ok(true) => {}
    }

    let result = if event.kind == KIND_DELETION {
        relay.handle_delete_request(event).await
    } else {
        relay.add_event(event).await
    };

    let reply = match result {
        Ok(()) => RelayMessage::ok(&event.id, true, ""),
        Err(e) => RelayMessage::ok(&event.id, false, normalize_reason(&e.to_string(), "blocked")),
    };
    conn.reply(&reply).await;
}

async fn handle_req(
    relay: &Relay,
    conn: &Arc<Connection>,
    subscription_id: String,
    filters: Vec<Filter>,
) {
    let latch = Arc::new(EoseLatch::new(filters.len()));

    let mut accepted = Vec::with_capacity(filters.len());
    let mut last_reason = String::new();
    for filter in filters {
        match relay
            .handle_request(conn, &subscription_id, &latch, &filter)
            .await
        {
            Ok(()) => accepted.push(filter),
            Err(e) => last_reason = e.to_string(),
        }
    }

    if accepted.is_empty() {
        conn.reply(&RelayMessage::closed(
            &subscription_id,
            normalize_reason(&last_reason, "blocked"),
        ))
        .await;
        return;
    }

    relay
        .listeners()
        .set_listener(&subscription_id, conn, accepted)
        .await;

    let conn = conn.clone();
    tokio::spawn(async move {
        latch.wait().await;
        conn.reply(&RelayMessage::Eose(subscription_id)).await;
    });
}

async fn handle_auth(relay: &Relay, conn: &Connection, event: &Event) {
    let Some(service_url) = relay.service_url() else {
        return;
    };

    let reply = match validate_auth_event(event, conn.challenge(), service_url) {
        Some(pubkey) => {
            if conn.set_authed(pubkey.clone()) {
                info!(conn = conn.id(), pubkey = %pubkey, "client authenticated");
            }
            RelayMessage::ok(&event.id, true, "")
        }
        None => RelayMessage::ok(&event.id, false, "error: failed to authenticate"),
    };
    conn.reply(&reply).await;
}

async fn handle_count(relay: &Relay, conn: &Connection, subscription_id: &str, filters: &[Filter]) {
    let Some(counter) = relay.counter() else {
        conn.reply(&RelayMessage::closed(
            subscription_id,
            "unsupported: this relay does not support NIP-45",
        ))
        .await;
        return;
    };

    let mut total = 0;
    for filter in filters {
        total += relay
            .handle_count_request(conn, &**counter, filter)
            .await;
    }

    conn.reply(&RelayMessage::Count {
        subscription_id: subscription_id.to_string(),
        count: total,
    })
    .await;
}
