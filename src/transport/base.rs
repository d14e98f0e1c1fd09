//! Base transport. Shared lifecycle and the send-side encryption policy
//! used identically by the client and server transports.

use std::sync::Arc;

use crate::codec;
use crate::config::EncryptionMode;
use crate::error::BridgeError;
use crate::event::{now_unix, Event, Filter, Tag};
use crate::mcp::McpMessage;
use crate::relay::RelayPool;
use crate::signer::Signer;

/// Lifecycle and send helpers shared by [`crate::transport::ClientTransport`]
/// and [`crate::transport::ServerTransport`]. Neither transport mutates this
/// directly beyond calling its methods — it owns no session state of its
/// own.
pub struct BaseTransport {
    pub pool: Arc<RelayPool>,
    pub signer: Arc<Signer>,
}

impl BaseTransport {
    pub fn new(pool: Arc<RelayPool>, signer: Arc<Signer>) -> Self {
        Self { pool, signer }
    }

    pub async fn connect(&self) {
        self.pool.connect().await;
    }

    pub async fn disconnect(&self) {
        self.pool.disconnect().await;
    }

    /// The subscription filter every transport starts with: both carrier
    /// kinds, addressed to us, restricted to events from "now" on to avoid
    /// replaying old ephemeral traffic.
    pub fn base_filter(local_pubkey: &str) -> Filter {
        Filter::new()
            .kinds(vec![codec::KIND_RPC, codec::KIND_GIFT_WRAP])
            .pubkey(local_pubkey)
            .since(now_unix())
    }

    /// Encode, sign, optionally gift-wrap, and publish `message`. Returns the
    /// *inner* signed event — the one whose id participates in `e`-tag
    /// correlation, whether or not it ended up wrapped for transport.
    ///
    /// `force_encryption` is the caller's signal that encryption should be
    /// preferred under `OPTIONAL` policy (e.g. the inbound request that
    /// prompted this reply arrived encrypted).
    pub async fn send_mcp_message(
        &self,
        message: &McpMessage,
        recipient_pubkey: &str,
        kind: u16,
        tags: Vec<Tag>,
        encryption_mode: EncryptionMode,
        force_encryption: bool,
    ) -> Result<Event, BridgeError> {
        let should_encrypt = !codec::is_discovery_kind(kind)
            && match encryption_mode {
                EncryptionMode::Disabled => false,
                EncryptionMode::Optional => force_encryption,
                EncryptionMode::Required => true,
            };

        let template = codec::encode(self.signer.public_key(), message, kind, tags)?;
        let signed = self.signer.sign(template)?;

        let outbound = if should_encrypt {
            codec::wrap_for_recipient(&signed, recipient_pubkey)?
        } else {
            signed.clone()
        };

        self.pool.publish(&outbound).await?;
        Ok(signed)
    }
}
