//! Client transport. Sends outbound requests, correlates inbound responses
//! by the `e` tag, and surfaces notifications to the caller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec;
use crate::config::{ClientTransportConfig, EncryptionMode};
use crate::error::BridgeError;
use crate::event::Event;
use crate::mcp::{self, McpMessage};
use crate::relay::RelayPool;
use crate::signer::Signer;
use crate::transport::base::BaseTransport;

/// The client half of the bridge: one instance talks to exactly one remote
/// MCP server, identified by [`ClientTransportConfig::server_pubkey`].
pub struct ClientTransport {
    base: BaseTransport,
    config: ClientTransportConfig,
    pending_request_ids: Arc<Mutex<HashSet<String>>>,
    server_init_result: Arc<Mutex<Option<Value>>>,
    /// Set once the server has been observed replying with an encrypted
    /// event, which under `OPTIONAL` policy is taken as proof the server
    /// accepts encryption — subsequent outbound requests then encrypt too.
    server_accepts_encryption: AtomicBool,
    inbound_tx: mpsc::Sender<McpMessage>,
    inbound_rx: Mutex<mpsc::Receiver<McpMessage>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientTransport {
    pub fn new(pool: Arc<RelayPool>, signer: Arc<Signer>, config: ClientTransportConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Arc::new(Self {
            base: BaseTransport::new(pool, signer),
            config,
            pending_request_ids: Arc::new(Mutex::new(HashSet::new())),
            server_init_result: Arc::new(Mutex::new(None)),
            server_accepts_encryption: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            dispatch_task: Mutex::new(None),
        })
    }

    /// Connect the pool and begin consuming inbound events. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.dispatch_task.lock().await.is_some() {
            return;
        }
        self.base.connect().await;
        let filter = BaseTransport::base_filter(self.base.signer.public_key());
        let mut events = self.base.pool.subscribe(vec![filter]).await;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_inbound(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client: dropped events, subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.dispatch_task.lock().await = Some(handle);
    }

    /// Publish `message` to the configured server. Returns the inner event
    /// id now tracked in `pending_request_ids`.
    pub async fn send(&self, message: McpMessage) -> Result<String, BridgeError> {
        let tags = vec![vec!["p".to_string(), self.config.server_pubkey.clone()]];
        let force_encryption = self.server_accepts_encryption.load(Ordering::Relaxed);
        let signed = self
            .base
            .send_mcp_message(
                &message,
                &self.config.server_pubkey,
                codec::KIND_RPC,
                tags,
                self.config.encryption_mode,
                force_encryption,
            )
            .await?;
        self.pending_request_ids.lock().await.insert(signed.id.clone());
        Ok(signed.id)
    }

    async fn handle_inbound(&self, event: Event) {
        let (inner, was_encrypted) = if event.kind == codec::KIND_GIFT_WRAP {
            match codec::unwrap_gift_wrap(&event, &self.base.signer) {
                Ok(inner) => (inner, true),
                Err(e) => {
                    warn!("client: gift-wrap decrypt failed: {e}");
                    return;
                }
            }
        } else {
            (event, false)
        };

        if self.config.encryption_mode == EncryptionMode::Required && !was_encrypted {
            debug!("client: dropping cleartext event under REQUIRED policy");
            return;
        }
        if self.config.encryption_mode == EncryptionMode::Disabled && was_encrypted {
            debug!("client: dropping encrypted event under DISABLED policy");
            return;
        }

        if inner.tag_value("p") != Some(self.base.signer.public_key()) {
            return;
        }

        if was_encrypted && inner.pubkey == self.config.server_pubkey {
            self.server_accepts_encryption.store(true, Ordering::Relaxed);
        }

        let Some(message) = codec::decode(&inner) else {
            debug!(event_id = %inner.id, "client: dropping event with unparseable content");
            return;
        };

        if mcp::is_initialize_result(&message) {
            let mut guard = self.server_init_result.lock().await;
            if guard.is_none() {
                if let McpMessage::Response { result: Some(r), .. } = &message {
                    *guard = Some(r.clone());
                }
            }
        }

        match inner.tag_value("e") {
            Some(event_id) => {
                let mut pending = self.pending_request_ids.lock().await;
                if pending.remove(event_id) {
                    drop(pending);
                    let _ = self.inbound_tx.send(message).await;
                } else {
                    debug!(event_id, "client: dropping response with unknown correlation");
                }
            }
            None => {
                if message.is_notification() {
                    let _ = self.inbound_tx.send(message).await;
                } else {
                    warn!("client: message has no e tag and is not a notification");
                }
            }
        }
    }

    /// Receive the next delivered response or notification.
    pub async fn recv(&self) -> Option<McpMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// The server's captured `initialize` result, if one has arrived yet.
    pub async fn server_init_result(&self) -> Option<Value> {
        self.server_init_result.lock().await.clone()
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatch_task.lock().await.take() {
            handle.abort();
        }
        self.base.pool.unsubscribe_all().await;
        self.base.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_request_ids_tracks_sent_requests() {
        let pool = RelayPool::new(crate::config::RelayPoolConfig { relay_urls: vec![] });
        let server = Signer::generate();
        let client_signer = Arc::new(Signer::generate());
        let transport = ClientTransport::new(
            pool,
            client_signer,
            ClientTransportConfig {
                server_pubkey: server.public_key().to_string(),
                encryption_mode: EncryptionMode::Optional,
            },
        );

        // No relays configured, so publish will fail — but pending tracking
        // only happens after a successful publish, which requires at least
        // one connected relay. With zero relays this exercises the
        // "no relay accepted" error path instead.
        let msg = McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: serde_json::json!(1),
            method: "tools/list".into(),
            params: None,
        };
        let result = transport.send(msg).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn encrypted_reply_from_server_flips_force_encryption() {
        let pool = RelayPool::new(crate::config::RelayPoolConfig { relay_urls: vec![] });
        let server = Signer::generate();
        let client_signer = Arc::new(Signer::generate());
        let transport = ClientTransport::new(
            Arc::clone(&pool),
            Arc::clone(&client_signer),
            ClientTransportConfig {
                server_pubkey: server.public_key().to_string(),
                encryption_mode: EncryptionMode::Optional,
            },
        );

        assert!(!transport.server_accepts_encryption.load(Ordering::Relaxed));

        let response = McpMessage::Response {
            jsonrpc: "2.0".into(),
            id: serde_json::json!("req-1"),
            result: Some(serde_json::json!({"ok": true})),
            error: None,
        };
        let tags = vec![vec!["p".to_string(), client_signer.public_key().to_string()]];
        let template = codec::encode(server.public_key(), &response, codec::KIND_RPC, tags).unwrap();
        let inner = server.sign(template).unwrap();
        let wrapped = codec::wrap_for_recipient(&inner, client_signer.public_key()).unwrap();

        transport.handle_inbound(wrapped).await;
        assert!(transport.server_accepts_encryption.load(Ordering::Relaxed));
        assert!(transport.pending_request_ids.lock().await.is_empty());
    }
}
