//! NIP-42 client authentication.
//!
//! A client proves control of a key by signing a kind-22242 event that carries
//! the connection's challenge and the relay's own URL.

use crate::event::{Event, KIND_CLIENT_AUTH};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Maximum distance between the auth event's `created_at` and now.
pub const AUTH_WINDOW_SECS: u64 = 600;

/// Validate `event` against `challenge` and `service_url`.
///
/// Returns the authenticated pubkey on success.
pub fn validate_auth_event(event: &Event, challenge: &str, service_url: &str) -> Option<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    validate_auth_event_at(event, challenge, service_url, now)
}

/// [`validate_auth_event`] with an explicit clock.
pub fn validate_auth_event_at(
    event: &Event,
    challenge: &str,
    service_url: &str,
    now: u64,
) -> Option<String> {
    if event.kind != KIND_CLIENT_AUTH {
        return None;
    }

    let has_challenge = event
        .tags
        .iter()
        .any(|t| t.len() >= 2 && t[0] == "challenge" && t[1] == challenge);
    if !has_challenge {
        return None;
    }

    let expected = parse_relay_url(service_url)?;
    let found = parse_relay_url(event.tag_value("relay")?)?;
    if expected != found {
        return None;
    }

    if event.created_at.abs_diff(now) > AUTH_WINDOW_SECS {
        return None;
    }

    if !event.check_id() || !matches!(event.check_signature(), Ok(true)) {
        return None;
    }

    Some(event.pubkey.clone())
}

/// Comparable parts of a relay URL: scheme, host, explicit port, path.
fn parse_relay_url(raw: &str) -> Option<(String, String, Option<u16>, String)> {
    let lowered = raw.trim().to_lowercase();
    let url = Url::parse(lowered.trim_end_matches('/')).ok()?;
    Some((
        url.scheme().to_string(),
        url.host_str()?.to_string(),
        url.port(),
        url.path().trim_end_matches('/').to_string(),
    ))
}
