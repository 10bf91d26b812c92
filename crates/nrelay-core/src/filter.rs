//! NIP-01 subscription filters.
//!
//! The connection core treats filters as opaque and hands them to the store
//! and the listener registry unchanged; matching lives here so both of those
//! collaborators agree on what a filter selects.

use crate::event::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A NIP-01 filter as received in `REQ` and `COUNT` envelopes.
///
/// Unknown keys are ignored; keys starting with `#` must hold string arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireFilter")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Inclusive lower bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Inclusive upper bound on `created_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// NIP-50 search term; carried through, never matched here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Tag queries keyed with their `#` prefix (`"#e"`, `"#p"`, ...).
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

/// Decoding form of [`Filter`]: every key that is not a known field lands in
/// `extra`.
#[derive(Deserialize)]
struct WireFilter {
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default)]
    kinds: Option<Vec<u16>>,
    #[serde(default)]
    since: Option<u64>,
    #[serde(default)]
    until: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    search: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TryFrom<WireFilter> for Filter {
    type Error = String;

    fn try_from(wire: WireFilter) -> Result<Self, Self::Error> {
        let mut tags = BTreeMap::new();
        for (key, value) in wire.extra {
            if !key.starts_with('#') {
                continue;
            }
            let values: Vec<String> = serde_json::from_value(value)
                .map_err(|e| format!("invalid tag query {key}: {e}"))?;
            tags.insert(key, values);
        }

        Ok(Filter {
            ids: wire.ids,
            authors: wire.authors,
            kinds: wire.kinds,
            since: wire.since,
            until: wire.until,
            limit: wire.limit,
            search: wire.search,
            tags,
        })
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag query; `name` may be given with or without the `#`.
    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let key = if name.starts_with('#') {
            name.to_string()
        } else {
            format!("#{name}")
        };
        self.tags.insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `event` satisfies every condition of this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }

        if let Some(ref authors) = self.authors {
            if !authors.iter().any(|a| *a == event.pubkey) {
                return false;
            }
        }

        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        for (key, values) in &self.tags {
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            let hit = event
                .tags
                .iter()
                .any(|t| t.len() >= 2 && t[0] == name && values.contains(&t[1]));
            if !hit {
                return false;
            }
        }

        true
    }
}
