//! Nostr event types shared by the signer, codec, and relay pool.
//!
//! An [`Event`] is the immutable, signed unit of the network:
//! id/pubkey/created_at/kind/tags/content/sig. An [`UnsignedEvent`] is the
//! same record before id/sig are filled in — the template a caller builds
//! and hands to the signer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BridgeError;

/// Maximum serialized event size.
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

pub type Tag = Vec<String>;

/// A template for an event: everything except `id` and `sig`, which the
/// signer fills in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    pub fn new(pubkey: impl Into<String>, kind: u16, tags: Vec<Tag>, content: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: now_unix(),
            kind,
            tags,
            content: content.into(),
        }
    }

    /// NIP-01 canonical serialization used to derive the event id:
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn canonical_json(&self) -> String {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        // serde_json::Value serializes maps with insertion order preserved
        // for arrays; no field reordering risk here since this is a tuple.
        arr.to_string()
    }

    pub fn id(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        hex::encode(digest)
    }
}

/// A fully signed, immutable event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Checks that `id` matches the canonical hash of the other fields and
    /// that the overall serialized size stays within bounds. Does not check
    /// the signature — see [`crate::signer::Signer::verify`].
    pub fn check_well_formed(&self) -> Result<(), BridgeError> {
        let unsigned = UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        };
        if unsigned.id() != self.id {
            return Err(BridgeError::InvalidEvent("id does not match content".into()));
        }
        let size = serde_json::to_string(self).map(|s| s.len()).unwrap_or(usize::MAX);
        if size > MAX_EVENT_SIZE {
            return Err(BridgeError::InvalidEvent("event exceeds 1 MiB".into()));
        }
        Ok(())
    }

    /// First value of the tag named `name`'s second element, if present.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
    }
}

/// A filter over event fields, used to construct relay subscriptions.
/// Covers only the filter vocabulary this bridge actually needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p: Option<Vec<String>>,
    #[serde(rename = "#e", skip_serializing_if = "Option::is_none")]
    pub e: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.p = Some(vec![pubkey.into()]);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_stable_tuple_shape() {
        let ev = UnsignedEvent::new("abc", 1, vec![vec!["p".into(), "def".into()]], "hello");
        let json = ev.canonical_json();
        assert!(json.starts_with("[0,\"abc\","));
        assert!(json.ends_with("\"hello\"]"));
    }

    #[test]
    fn id_is_deterministic_for_identical_input() {
        let mut a = UnsignedEvent::new("abc", 1, vec![], "x");
        a.created_at = 1000;
        let mut b = a.clone();
        b.created_at = 1000;
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_changes_with_content() {
        let mut a = UnsignedEvent::new("abc", 1, vec![], "x");
        a.created_at = 1000;
        let mut b = a.clone();
        b.content = "y".into();
        assert_ne!(a.id(), b.id());
    }
}
