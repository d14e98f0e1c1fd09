//! Event <-> MCP message codec.
//!
//! Encoding wraps a JSON-RPC message as an event's `content`; decoding
//! parses it back, tolerating malformed content by returning `None` rather
//! than failing the caller's subscription.
//!
//! Gift-wrap encrypts a fully signed inner event for a recipient behind an
//! ephemeral kind-1059 envelope, carrying the signed event itself rather
//! than an unsigned NIP-59 rumor.

use rand_core::{OsRng, RngCore};

use crate::error::BridgeError;
use crate::event::{Event, Tag, UnsignedEvent, MAX_EVENT_SIZE};
use crate::mcp::McpMessage;
use crate::signer::Signer;

pub const KIND_RPC: u16 = 25910;
pub const KIND_GIFT_WRAP: u16 = 1059;
pub const KIND_SERVER_ANNOUNCEMENT: u16 = 11316;
pub const KIND_TOOLS_LIST: u16 = 11317;
pub const KIND_RESOURCES_LIST: u16 = 11318;
pub const KIND_RESOURCE_TEMPLATES_LIST: u16 = 11319;
pub const KIND_PROMPTS_LIST: u16 = 11320;

/// Discovery kinds are always published in clear — never gift-wrapped.
pub fn is_discovery_kind(kind: u16) -> bool {
    matches!(
        kind,
        KIND_SERVER_ANNOUNCEMENT | KIND_TOOLS_LIST | KIND_RESOURCES_LIST
            | KIND_RESOURCE_TEMPLATES_LIST | KIND_PROMPTS_LIST
    )
}

/// Build an unsigned event whose content is the JSON serialization of
/// `message`. The tag set is exactly what the caller supplies — no implicit
/// additions.
pub fn encode(
    author_pubkey: &str,
    message: &McpMessage,
    kind: u16,
    tags: Vec<Tag>,
) -> Result<UnsignedEvent, BridgeError> {
    let content = serde_json::to_string(message)?;
    if content.len() > MAX_EVENT_SIZE {
        return Err(BridgeError::InvalidEvent("message exceeds 1 MiB".into()));
    }
    Ok(UnsignedEvent::new(author_pubkey, kind, tags, content))
}

/// Parse an event's content as an MCP message. Returns `None` — the
/// "invalid" sentinel — on any parse failure; callers must skip such
/// events rather than fail the subscription.
pub fn decode(event: &Event) -> Option<McpMessage> {
    serde_json::from_str(&event.content).ok()
}

/// The decrypted, fully signed inner event carried by a gift wrap.
pub type GiftWrapEnvelope = Event;

/// Encrypt `inner` (already signed by its true author) for `recipient_pubkey`
/// behind a fresh ephemeral keypair.
///
/// Returns the kind-1059 envelope, ready to publish unsigned-by-caller (it
/// is already signed by the ephemeral key).
pub fn wrap_for_recipient(inner: &Event, recipient_pubkey: &str) -> Result<Event, BridgeError> {
    let serialized = serde_json::to_string(inner)?;

    let ephemeral = Signer::generate();
    let ciphertext = ephemeral.encrypt(recipient_pubkey, &serialized)?;

    // Randomize the timestamp within a small jitter window to hide send time.
    let jitter_secs = (OsRng.next_u32() % 600) as u64; // up to ~10 minutes in the past
    let created_at = crate::event::now_unix().saturating_sub(jitter_secs);

    let template = UnsignedEvent {
        pubkey: ephemeral.public_key().to_string(),
        created_at,
        kind: KIND_GIFT_WRAP,
        tags: vec![vec!["p".to_string(), recipient_pubkey.to_string()]],
        content: ciphertext,
    };

    ephemeral.sign(template)
}

/// Unwrap a kind-1059 event addressed to `our_signer`, returning the inner
/// signed event. The inner event's own `pubkey` is the true sender — the
/// wrap's author is a throwaway key.
pub fn unwrap_gift_wrap(envelope: &Event, our_signer: &Signer) -> Result<GiftWrapEnvelope, BridgeError> {
    if envelope.kind != KIND_GIFT_WRAP {
        return Err(BridgeError::InvalidEvent("not a gift-wrap event".into()));
    }
    let plaintext = our_signer.decrypt(&envelope.pubkey, &envelope.content)?;
    let inner: Event = serde_json::from_str(&plaintext)
        .map_err(|e| BridgeError::DecryptFailed(format!("inner event did not parse: {e}")))?;
    Ok(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpMessage;
    use serde_json::json;

    #[test]
    fn round_trip_preserves_message_and_tags() {
        let signer = Signer::generate();
        let msg = McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!(7),
            method: "tools/list".into(),
            params: Some(json!({})),
        };
        let tags = vec![vec!["p".to_string(), "deadbeef".to_string()]];
        let template = encode(signer.public_key(), &msg, KIND_RPC, tags.clone()).unwrap();
        let event = signer.sign(template).unwrap();

        assert_eq!(event.tags, tags);
        let decoded = decode(&event).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_of_garbage_content_is_none() {
        let signer = Signer::generate();
        let template = UnsignedEvent::new(signer.public_key(), KIND_RPC, vec![], "not json");
        let event = signer.sign(template).unwrap();
        assert!(decode(&event).is_none());
    }

    #[test]
    fn gift_wrap_round_trip_reveals_true_sender() {
        let sender = Signer::generate();
        let recipient = Signer::generate();

        let msg = McpMessage::Notification {
            jsonrpc: "2.0".into(),
            method: "notifications/initialized".into(),
            params: None,
        };
        let template = encode(sender.public_key(), &msg, KIND_RPC, vec![]).unwrap();
        let inner = sender.sign(template).unwrap();

        let wrap = wrap_for_recipient(&inner, recipient.public_key()).unwrap();
        assert_eq!(wrap.kind, KIND_GIFT_WRAP);
        assert_ne!(wrap.pubkey, sender.public_key());

        let unwrapped = unwrap_gift_wrap(&wrap, &recipient).unwrap();
        assert_eq!(unwrapped.pubkey, sender.public_key());
        assert_eq!(decode(&unwrapped).unwrap(), msg);
    }

    #[test]
    fn oversized_message_is_rejected_before_encoding() {
        let signer = Signer::generate();
        let huge = "x".repeat(MAX_EVENT_SIZE + 10);
        let msg = McpMessage::Notification {
            jsonrpc: "2.0".into(),
            method: "notifications/progress".into(),
            params: Some(json!({ "blob": huge })),
        };
        let result = encode(signer.public_key(), &msg, KIND_RPC, vec![]);
        assert!(result.is_err());
    }
}
