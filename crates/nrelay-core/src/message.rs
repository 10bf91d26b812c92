//! Protocol envelopes exchanged over a relay connection.
//!
//! Every frame is a JSON array whose first element names the message:
//!
//! - client → relay: `EVENT`, `REQ`, `CLOSE`, `AUTH`, `COUNT`
//! - relay → client: `OK`, `CLOSED`, `EOSE`, `EVENT`, `COUNT`, `NOTICE`, `AUTH`

use crate::event::Event;
use crate::filter::Filter;
use serde_json::{json, Value};

/// A decoded client-to-relay envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Box<Event>),
    /// `["REQ", <sub id>, <filter>, ...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <sub id>]`
    Close(String),
    /// `["AUTH", <signed auth event>]`
    Auth(Box<Event>),
    /// `["COUNT", <sub id>, <filter>, ...]`
    Count {
        subscription_id: String,
        filters: Vec<Filter>,
    },
}

impl ClientMessage {
    /// Decode a text frame.
    ///
    /// Returns `None` for anything that is not one of the five known shapes,
    /// including unknown labels and malformed payloads; callers drop those.
    pub fn parse(text: &str) -> Option<Self> {
        let arr: Vec<Value> = serde_json::from_str(text).ok()?;
        let (label, rest) = arr.split_first()?;

        match label.as_str()? {
            "EVENT" => {
                let event = serde_json::from_value(rest.first()?.clone()).ok()?;
                Some(ClientMessage::Event(Box::new(event)))
            }
            "AUTH" => {
                let event = serde_json::from_value(rest.first()?.clone()).ok()?;
                Some(ClientMessage::Auth(Box::new(event)))
            }
            "CLOSE" => Some(ClientMessage::Close(rest.first()?.as_str()?.to_string())),
            "REQ" => {
                let (subscription_id, filters) = parse_subscription(rest)?;
                Some(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "COUNT" => {
                let (subscription_id, filters) = parse_subscription(rest)?;
                Some(ClientMessage::Count {
                    subscription_id,
                    filters,
                })
            }
            _ => None,
        }
    }

    /// Label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "EVENT",
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Close(_) => "CLOSE",
            ClientMessage::Auth(_) => "AUTH",
            ClientMessage::Count { .. } => "COUNT",
        }
    }
}

/// `<sub id>, <filter>, <filter>...`; at least one filter is required.
fn parse_subscription(rest: &[Value]) -> Option<(String, Vec<Filter>)> {
    let (id, filters) = rest.split_first()?;
    if filters.is_empty() {
        return None;
    }
    let filters = filters
        .iter()
        .map(|f| serde_json::from_value(f.clone()))
        .collect::<Result<Vec<Filter>, _>>()
        .ok()?;
    Some((id.as_str()?.to_string(), filters))
}

/// A relay-to-client envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Ok {
        event_id: String,
        accepted: bool,
        reason: String,
    },
    Closed {
        subscription_id: String,
        reason: String,
    },
    Eose(String),
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    Count {
        subscription_id: String,
        count: i64,
    },
    Notice(String),
    Auth {
        challenge: String,
    },
}

impl RelayMessage {
    pub fn ok(event_id: &str, accepted: bool, reason: impl Into<String>) -> Self {
        RelayMessage::Ok {
            event_id: event_id.to_string(),
            accepted,
            reason: reason.into(),
        }
    }

    pub fn closed(subscription_id: &str, reason: impl Into<String>) -> Self {
        RelayMessage::Closed {
            subscription_id: subscription_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RelayMessage::Ok { .. } => "OK",
            RelayMessage::Closed { .. } => "CLOSED",
            RelayMessage::Eose(_) => "EOSE",
            RelayMessage::Event { .. } => "EVENT",
            RelayMessage::Count { .. } => "COUNT",
            RelayMessage::Notice(_) => "NOTICE",
            RelayMessage::Auth { .. } => "AUTH",
        }
    }

    /// JSON array form.
    pub fn to_value(&self) -> Value {
        match self {
            RelayMessage::Ok {
                event_id,
                accepted,
                reason,
            } => json!(["OK", event_id, accepted, reason]),
            RelayMessage::Closed {
                subscription_id,
                reason,
            } => json!(["CLOSED", subscription_id, reason]),
            RelayMessage::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            RelayMessage::Count {
                subscription_id,
                count,
            } => json!(["COUNT", subscription_id, { "count": count }]),
            RelayMessage::Notice(msg) => json!(["NOTICE", msg]),
            RelayMessage::Auth { challenge } => json!(["AUTH", challenge]),
        }
    }

    /// Encode as a text frame payload.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

/// Make `reason` machine-readable.
///
/// A reason that already starts with a single word followed by `": "`
/// (`"blocked: ..."`, `"rate-limited: ..."`) is returned unchanged; anything
/// else gets `prefix` prepended.
pub fn normalize_reason(reason: &str, prefix: &str) -> String {
    match reason.find(": ") {
        Some(idx) if !reason[..idx].contains(' ') => reason.to_string(),
        _ => format!("{prefix}: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT_JSON: &str = r#"{"id":"aa","pubkey":"bb","created_at":1,"kind":1,"tags":[],"content":"hi","sig":"cc"}"#;

    #[test]
    fn parse_event() {
        let msg = ClientMessage::parse(&format!(r#"["EVENT",{EVENT_JSON}]"#)).unwrap();
        match msg {
            ClientMessage::Event(e) => assert_eq!(e.content, "hi"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_req_keeps_filter_order() {
        let msg = ClientMessage::parse(r#"["REQ","sub1",{"kinds":[1]},{"kinds":[2]}]"#).unwrap();
        let ClientMessage::Req {
            subscription_id,
            filters,
        } = msg
        else {
            panic!("expected REQ");
        };
        assert_eq!(subscription_id, "sub1");
        assert_eq!(filters[0].kinds, Some(vec![1]));
        assert_eq!(filters[1].kinds, Some(vec![2]));
    }

    #[test]
    fn req_with_unknown_filter_keys_still_parses() {
        let msg = ClientMessage::parse(r#"["REQ","s",{"kinds":[1],"foo":true}]"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Req {
                subscription_id: "s".into(),
                filters: vec![Filter::new().kinds([1])],
            }
        );
    }

    #[test]
    fn parse_close_auth_count() {
        assert_eq!(
            ClientMessage::parse(r#"["CLOSE","sub1"]"#),
            Some(ClientMessage::Close("sub1".into()))
        );
        assert!(matches!(
            ClientMessage::parse(&format!(r#"["AUTH",{EVENT_JSON}]"#)),
            Some(ClientMessage::Auth(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"["COUNT","c",{}]"#),
            Some(ClientMessage::Count { .. })
        ));
    }

    #[test]
    fn unknown_and_malformed_frames_decode_to_none() {
        for text in [
            "",
            "not json",
            "{}",
            "[]",
            r#"["NEG-OPEN","x"]"#,
            r#"["EVENT"]"#,
            r#"["EVENT",{"id":1}]"#,
            r#"["REQ","sub1"]"#,
            r#"["REQ",1,{}]"#,
            r#"["CLOSE"]"#,
        ] {
            assert_eq!(ClientMessage::parse(text), None, "{text}");
        }
    }

    #[test]
    fn relay_messages_encode_as_arrays() {
        assert_eq!(
            RelayMessage::ok("id1", false, "invalid: nope").to_json(),
            r#"["OK","id1",false,"invalid: nope"]"#
        );
        assert_eq!(RelayMessage::Eose("s".into()).to_json(), r#"["EOSE","s"]"#);
        assert_eq!(
            RelayMessage::Count {
                subscription_id: "s".into(),
                count: 3
            }
            .to_json(),
            r#"["COUNT","s",{"count":3}]"#
        );
        assert_eq!(
            RelayMessage::closed("s", "blocked: no").to_json(),
            r#"["CLOSED","s","blocked: no"]"#
        );
    }

    #[test]
    fn normalize_keeps_prefixed_reasons() {
        assert_eq!(normalize_reason("rate-limited: slow down", "blocked"), "rate-limited: slow down");
        assert_eq!(normalize_reason("storage full", "blocked"), "blocked: storage full");
        assert_eq!(normalize_reason("disk is: full", "error"), "error: disk is: full");
        assert_eq!(normalize_reason("", "blocked"), "blocked: ");
    }
}
