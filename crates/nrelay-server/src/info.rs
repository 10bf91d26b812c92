//! Relay information document (NIP-11).
//!
//! Served over plain HTTP on the WebSocket port to requests that carry
//! `Accept: application/nostr+json` and no upgrade.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Content type that selects the information document.
pub const NOSTR_JSON: &str = "application/nostr+json";

/// The NIP-11 document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayInformation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pubkey: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contact: String,
    #[serde(default)]
    pub supported_nips: Vec<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub software: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Callback that adjusts the document per request.
pub type OverwriteInfoHook =
    Arc<dyn Fn(&RequestHead, RelayInformation) -> RelayInformation + Send + Sync>;

/// Request line and headers of an incoming HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the head of an HTTP/1.x request; `None` until `\r\n\r\n` is seen.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(buf).ok()?;
        let head = &text[..text.find("\r\n\r\n")?];
        let mut lines = head.split("\r\n");

        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();

        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        Some(Self {
            method,
            path,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    /// A plain request asking for the information document.
    pub fn wants_info(&self) -> bool {
        !self.is_upgrade()
            && self
                .header("accept")
                .is_some_and(|v| v.contains(NOSTR_JSON))
    }
}

/// Apply the overwrite hooks in registration order.
pub fn resolve_info(
    base: &RelayInformation,
    hooks: &[OverwriteInfoHook],
    request: &RequestHead,
) -> RelayInformation {
    hooks
        .iter()
        .fold(base.clone(), |info, hook| hook(request, info))
}

/// Render a complete HTTP/1.1 response carrying `info`.
pub fn render_info_response(info: &RelayInformation) -> serde_json::Result<String> {
    let body = serde_json::to_string(info)?;
    Ok(format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {NOSTR_JSON}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Headers: *\r\n\
         Access-Control-Allow-Methods: GET, OPTIONS\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    ))
}
