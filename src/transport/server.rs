//! Server transport. Multiplexes many remote MCP clients onto one local MCP
//! server: tracks a session per remote public key, overwrites JSON-RPC ids
//! with the Nostr event id for global uniqueness, routes progress and
//! payment-required notifications back to the originating client, and
//! bootstraps discovery announcements for public servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{
    self, KIND_PROMPTS_LIST, KIND_RESOURCES_LIST, KIND_RESOURCE_TEMPLATES_LIST,
    KIND_SERVER_ANNOUNCEMENT, KIND_TOOLS_LIST,
};
use crate::config::{EncryptionMode, ServerTransportConfig};
use crate::error::BridgeError;
use crate::event::{now_unix, Event, Tag, UnsignedEvent, MAX_EVENT_SIZE};
use crate::mcp::{self, McpMessage};
use crate::relay::RelayPool;
use crate::signer::Signer;
use crate::transport::base::BaseTransport;

/// The id a bootstrap announcement request carries instead of a real
/// JSON-RPC id from a remote client — never leaked onto the wire.
const ANNOUNCEMENT_ID: &str = "announcement";

/// Per-remote-client state.
#[derive(Debug, Default)]
pub struct ClientSession {
    pub is_initialized: bool,
    pub is_encrypted: bool,
    pub last_activity: u64,
    /// Keyed by either an inbound event id (value: the original JSON-RPC id
    /// the client sent) or a progress token string (value: the event id of
    /// the request that carried it).
    pub pending: HashMap<String, Value>,
}

/// The server half of the bridge: subscribes for inbound requests from any
/// remote client, forwards them (with rewritten ids) to a local MCP server
/// via [`ServerTransport::recv_for_local`], and accepts that server's
/// replies via [`ServerTransport::send`].
pub struct ServerTransport {
    base: BaseTransport,
    config: ServerTransportConfig,
    sessions: Arc<Mutex<HashMap<String, ClientSession>>>,
    is_initialized: Arc<Mutex<bool>>,
    to_local_tx: mpsc::Sender<McpMessage>,
    to_local_rx: Mutex<Option<mpsc::Receiver<McpMessage>>>,
    announcement_tx: mpsc::Sender<McpMessage>,
    announcement_rx: Mutex<mpsc::Receiver<McpMessage>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerTransport {
    pub fn new(pool: Arc<RelayPool>, signer: Arc<Signer>, config: ServerTransportConfig) -> Arc<Self> {
        let (to_local_tx, to_local_rx) = mpsc::channel(256);
        let (announcement_tx, announcement_rx) = mpsc::channel(8);
        Arc::new(Self {
            base: BaseTransport::new(pool, signer),
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            is_initialized: Arc::new(Mutex::new(false)),
            to_local_tx,
            to_local_rx: Mutex::new(Some(to_local_rx)),
            announcement_tx,
            announcement_rx: Mutex::new(announcement_rx),
            dispatch_task: Mutex::new(None),
            sweeper_task: Mutex::new(None),
        })
    }

    /// Connect, subscribe, and — for a public server — bootstrap discovery
    /// announcements.
    pub async fn start(self: &Arc<Self>) {
        if self.dispatch_task.lock().await.is_some() {
            return;
        }
        self.base.connect().await;
        let filter = BaseTransport::base_filter(self.base.signer.public_key());
        let mut events = self.base.pool.subscribe(vec![filter]).await;

        let this = Arc::clone(self);
        let dispatch = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_inbound(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "server: dropped events, subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.dispatch_task.lock().await = Some(dispatch);

        let sweeper_self = Arc::clone(self);
        let sweeper = tokio::spawn(async move { sweeper_self.sweep_loop().await });
        *self.sweeper_task.lock().await = Some(sweeper);

        if self.config.is_public_server {
            let bootstrap_self = Arc::clone(self);
            tokio::spawn(async move { bootstrap_self.bootstrap_announcements().await });
        }
    }

    /// Pull the next message the local MCP server should act on — a
    /// rewritten request, a forwarded notification, or a response being
    /// relayed between two remote clients via this server.
    pub async fn recv_for_local(&self) -> Option<McpMessage> {
        let mut guard = self.to_local_rx.lock().await;
        guard.as_mut()?.recv().await
    }

    async fn handle_inbound(&self, event: Event) {
        let (inner, is_encrypted) = if event.kind == codec::KIND_GIFT_WRAP {
            if self.config.encryption_mode == EncryptionMode::Disabled {
                debug!(event_id = %event.id, "server: dropping gift-wrap under DISABLED policy");
                return;
            }
            match codec::unwrap_gift_wrap(&event, &self.base.signer) {
                Ok(inner) => (inner, true),
                Err(e) => {
                    warn!("server: gift-wrap decrypt failed: {e}");
                    return;
                }
            }
        } else {
            if self.config.encryption_mode == EncryptionMode::Required {
                debug!(event_id = %event.id, "server: dropping cleartext event under REQUIRED policy");
                return;
            }
            (event, false)
        };

        if let Some(allowed) = &self.config.allowed_public_keys {
            if !allowed.contains(&inner.pubkey) {
                warn!(author = %inner.pubkey, "server: sender not authorized");
                return;
            }
        }

        let Some(message) = codec::decode(&inner) else {
            debug!(event_id = %inner.id, "server: dropping event with unparseable content");
            return;
        };

        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(inner.pubkey.clone()).or_default();
        session.last_activity = now_unix();
        session.is_encrypted = is_encrypted;

        match &message {
            McpMessage::Request { id, .. } => {
                let original_id = id.clone();
                let progress_token = message.progress_token();
                session.pending.insert(inner.id.clone(), original_id);
                if let Some(token) = progress_token {
                    session.pending.insert(token, Value::String(inner.id.clone()));
                }
                drop(sessions);
                let rewritten = message.with_id(Value::String(inner.id.clone()));
                let _ = self.to_local_tx.send(rewritten).await;
            }
            McpMessage::Notification { method, .. } => {
                if method == "notifications/initialized" {
                    session.is_initialized = true;
                }
                drop(sessions);
                let _ = self.to_local_tx.send(message).await;
            }
            McpMessage::Response { .. } => {
                drop(sessions);
                let _ = self.to_local_tx.send(message).await;
            }
        }
    }

    /// Accept a response or notification produced by the local MCP server
    /// and route it to the right remote client(s).
    pub async fn send(&self, message: McpMessage) -> Result<(), BridgeError> {
        match &message {
            McpMessage::Response { id, .. } => {
                if id.as_str() == Some(ANNOUNCEMENT_ID) {
                    let _ = self.announcement_tx.send(message).await;
                    return Ok(());
                }
                self.send_response(message).await
            }
            McpMessage::Notification { .. } => self.send_notification(message).await,
            McpMessage::Request { .. } => Ok(()),
        }
    }

    async fn send_response(&self, message: McpMessage) -> Result<(), BridgeError> {
        let event_id = match message.id() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(BridgeError::NoPendingRequest("<missing id>".into())),
        };

        let sessions = self.sessions.lock().await;
        let found = sessions.iter().find_map(|(pubkey, session)| {
            session
                .pending
                .get(&event_id)
                .map(|orig| (pubkey.clone(), orig.clone(), session.is_encrypted))
        });
        let Some((client_pubkey, original_id, is_encrypted)) = found else {
            return Err(BridgeError::NoPendingRequest(event_id));
        };
        drop(sessions);

        let restored = message.with_id(original_id);

        let mut tags = vec![
            vec!["p".to_string(), client_pubkey.clone()],
            vec!["e".to_string(), event_id.clone()],
        ];
        if mcp::is_initialize_result(&restored) && is_encrypted {
            tags.extend(self.common_discovery_tags());
        }

        self.base
            .send_mcp_message(
                &restored,
                &client_pubkey,
                codec::KIND_RPC,
                tags,
                self.config.encryption_mode,
                is_encrypted,
            )
            .await?;

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&client_pubkey) {
            session.pending.remove(&event_id);
            session
                .pending
                .retain(|_, v| v.as_str() != Some(event_id.as_str()));
        }
        Ok(())
    }

    async fn send_notification(&self, message: McpMessage) -> Result<(), BridgeError> {
        self.sweep_inactive_sessions().await;

        let McpMessage::Notification { method, .. } = &message else {
            return Ok(());
        };

        if method == "notifications/progress" {
            if let Some(token) = message.progress_token() {
                let sessions = self.sessions.lock().await;
                let found = sessions.iter().find_map(|(pubkey, session)| {
                    session
                        .pending
                        .get(&token)
                        .and_then(Value::as_str)
                        .map(|event_id| (pubkey.clone(), event_id.to_string(), session.is_encrypted))
                });
                drop(sessions);

                return match found {
                    Some((client_pubkey, event_id, is_encrypted)) => {
                        let tags = vec![
                            vec!["p".to_string(), client_pubkey.clone()],
                            vec!["e".to_string(), event_id],
                        ];
                        self.base
                            .send_mcp_message(
                                &message,
                                &client_pubkey,
                                codec::KIND_RPC,
                                tags,
                                self.config.encryption_mode,
                                is_encrypted,
                            )
                            .await
                            .map(|_| ())
                    }
                    None => Err(BridgeError::ProgressWithoutRequest(token)),
                };
            }
        }

        if method == "notifications/payment_required" {
            let Some(event_id) = message.related_request_id() else {
                return Err(BridgeError::NoPendingRequest(
                    "payment_required notification carries no relatedRequestId".into(),
                ));
            };
            let sessions = self.sessions.lock().await;
            let found = sessions.iter().find_map(|(pubkey, session)| {
                session
                    .pending
                    .contains_key(&event_id)
                    .then(|| (pubkey.clone(), session.is_encrypted))
            });
            drop(sessions);

            return match found {
                Some((client_pubkey, is_encrypted)) => {
                    let tags = vec![
                        vec!["p".to_string(), client_pubkey.clone()],
                        vec!["e".to_string(), event_id.clone()],
                    ];
                    self.base
                        .send_mcp_message(
                            &message,
                            &client_pubkey,
                            codec::KIND_RPC,
                            tags,
                            self.config.encryption_mode,
                            is_encrypted,
                        )
                        .await
                        .map(|_| ())
                }
                None => Err(BridgeError::NoPendingRequest(event_id)),
            };
        }

        let sessions = self.sessions.lock().await;
        let targets: Vec<(String, bool)> = sessions
            .iter()
            .filter(|(_, s)| s.is_initialized)
            .map(|(pubkey, s)| (pubkey.clone(), s.is_encrypted))
            .collect();
        drop(sessions);

        for (client_pubkey, is_encrypted) in targets {
            let tags = vec![vec!["p".to_string(), client_pubkey.clone()]];
            if let Err(e) = self
                .base
                .send_mcp_message(
                    &message,
                    &client_pubkey,
                    codec::KIND_RPC,
                    tags,
                    self.config.encryption_mode,
                    is_encrypted,
                )
                .await
            {
                warn!(client = %client_pubkey, "server: broadcast notification failed: {e}");
            }
        }
        Ok(())
    }

    fn common_discovery_tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        if let Some(info) = &self.config.server_info {
            if let Some(name) = &info.name {
                tags.push(vec!["name".to_string(), name.clone()]);
            }
            if let Some(about) = &info.about {
                tags.push(vec!["about".to_string(), about.clone()]);
            }
            if let Some(website) = &info.website {
                tags.push(vec!["website".to_string(), website.clone()]);
            }
            if let Some(picture) = &info.picture {
                tags.push(vec!["picture".to_string(), picture.clone()]);
            }
        }
        if self.config.encryption_mode != EncryptionMode::Disabled {
            tags.push(vec!["support_encryption".to_string()]);
        }
        for (cap_id, price) in &self.config.capability_pricing {
            tags.push(vec![
                "cap".to_string(),
                cap_id.clone(),
                price.price.clone(),
                price.currency.clone(),
            ]);
        }
        tags
    }

    /// Synthesize the internal initialize/list sequence and publish each
    /// response as a clear, replaceable discovery event.
    async fn bootstrap_announcements(self: Arc<Self>) {
        let steps: [(&str, u16); 5] = [
            ("initialize", KIND_SERVER_ANNOUNCEMENT),
            ("tools/list", KIND_TOOLS_LIST),
            ("resources/list", KIND_RESOURCES_LIST),
            ("resources/templates/list", KIND_RESOURCE_TEMPLATES_LIST),
            ("prompts/list", KIND_PROMPTS_LIST),
        ];

        for (method, kind) in steps {
            let request = McpMessage::Request {
                jsonrpc: "2.0".into(),
                id: Value::String(ANNOUNCEMENT_ID.to_string()),
                method: method.to_string(),
                params: Some(json!({})),
            };
            if self.to_local_tx.send(request).await.is_err() {
                warn!("server: local channel closed during announcement bootstrap");
                return;
            }

            let wait = if method == "initialize" {
                ServerTransportConfig::ANNOUNCEMENT_INIT_WAIT
            } else {
                Duration::from_secs(10)
            };

            let response = {
                let mut rx = self.announcement_rx.lock().await;
                tokio::time::timeout(wait, rx.recv()).await
            };

            let message = match response {
                Ok(Some(m)) => m,
                Ok(None) => {
                    warn!("server: announcement channel closed, aborting bootstrap");
                    return;
                }
                Err(_) => {
                    warn!(method, "server: announcement step timed out, proceeding anyway");
                    continue;
                }
            };

            let McpMessage::Response { result: Some(result), .. } = &message else {
                warn!(method, "server: announcement step returned no result, skipping publish");
                continue;
            };

            let tags = self.common_discovery_tags();
            if let Err(e) = self.publish_discovery(kind, result, tags).await {
                warn!(method, "server: failed to publish announcement: {e}");
            }

            if method == "initialize" {
                *self.is_initialized.lock().await = true;
                let _ = self
                    .to_local_tx
                    .send(McpMessage::Notification {
                        jsonrpc: "2.0".into(),
                        method: "notifications/initialized".into(),
                        params: None,
                    })
                    .await;
            }
        }
    }

    /// Publish a discovery event whose content is the bare result value,
    /// not a JSON-RPC envelope.
    async fn publish_discovery(&self, kind: u16, result: &Value, tags: Vec<Tag>) -> Result<(), BridgeError> {
        let content = serde_json::to_string(result)?;
        if content.len() > MAX_EVENT_SIZE {
            return Err(BridgeError::InvalidEvent("discovery payload exceeds 1 MiB".into()));
        }
        let template = UnsignedEvent::new(self.base.signer.public_key(), kind, tags, content);
        let signed = self.base.signer.sign(template)?;
        self.base.pool.publish(&signed).await
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.sweep_inactive_sessions().await;
        }
    }

    /// Sessions idle past `session_timeout` are removed.
    async fn sweep_inactive_sessions(&self) {
        let timeout = self.config.session_timeout.as_secs();
        let now = now_unix();
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| now.saturating_sub(s.last_activity) < timeout);
    }

    /// Close the pool, drop all session state, stop background tasks.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatch_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper_task.lock().await.take() {
            handle.abort();
        }
        self.base.pool.unsubscribe_all().await;
        self.base.disconnect().await;
        self.sessions.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayPoolConfig;

    fn test_config() -> ServerTransportConfig {
        ServerTransportConfig {
            server_info: None,
            is_public_server: false,
            allowed_public_keys: None,
            encryption_mode: EncryptionMode::Optional,
            capability_pricing: HashMap::new(),
            session_timeout: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn inbound_request_gets_event_id_as_rewritten_id() {
        let pool = RelayPool::new(RelayPoolConfig { relay_urls: vec![] });
        let server_signer = Arc::new(Signer::generate());
        let client = Signer::generate();

        let transport = ServerTransport::new(pool, server_signer.clone(), test_config());

        let msg = McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!(7),
            method: "tools/list".into(),
            params: Some(json!({})),
        };
        let tags = vec![vec!["p".to_string(), server_signer.public_key().to_string()]];
        let template = codec::encode(client.public_key(), &msg, codec::KIND_RPC, tags).unwrap();
        let event = client.sign(template).unwrap();

        transport.handle_inbound(event.clone()).await;

        let forwarded = transport.recv_for_local().await.unwrap();
        assert_eq!(forwarded.id(), Some(&json!(event.id)));
        assert_eq!(forwarded.method(), Some("tools/list"));

        let sessions = transport.sessions.lock().await;
        let session = sessions.get(client.public_key()).unwrap();
        assert_eq!(session.pending.get(&event.id), Some(&json!(7)));
    }

    #[tokio::test]
    async fn payment_required_notification_resolves_to_requesting_client() {
        let pool = RelayPool::new(RelayPoolConfig { relay_urls: vec![] });
        let server_signer = Arc::new(Signer::generate());
        let client = Signer::generate();

        let transport = ServerTransport::new(pool, server_signer.clone(), test_config());

        let request = McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!(1),
            method: "tools/call".into(),
            params: Some(json!({"name": "priced-tool"})),
        };
        let tags = vec![vec!["p".to_string(), server_signer.public_key().to_string()]];
        let template = codec::encode(client.public_key(), &request, codec::KIND_RPC, tags).unwrap();
        let event = client.sign(template).unwrap();
        transport.handle_inbound(event.clone()).await;
        let _ = transport.recv_for_local().await.unwrap();

        let notification = McpMessage::Notification {
            jsonrpc: "2.0".into(),
            method: "notifications/payment_required".into(),
            params: Some(json!({
                "_meta": {"relatedRequestId": event.id},
                "amount": "1000",
                "currency": "sats",
                "invoice": "lnbc1...",
            })),
        };

        // No relay is connected, so the send still fails — but at the
        // publish stage, which proves the event id resolved to a known
        // session rather than bailing out with NoPendingRequest.
        let err = transport.send(notification).await.unwrap_err();
        assert!(matches!(err, BridgeError::RelayPublishError));

        let unrelated = McpMessage::Notification {
            jsonrpc: "2.0".into(),
            method: "notifications/payment_required".into(),
            params: Some(json!({"_meta": {"relatedRequestId": "not-a-known-event-id"}})),
        };
        let err = transport.send(unrelated).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoPendingRequest(_)));
    }

    #[tokio::test]
    async fn unauthorized_sender_is_dropped() {
        let pool = RelayPool::new(RelayPoolConfig { relay_urls: vec![] });
        let server_signer = Arc::new(Signer::generate());
        let client = Signer::generate();

        let mut config = test_config();
        config.allowed_public_keys = Some(std::iter::once("someone-else".to_string()).collect());
        let transport = ServerTransport::new(pool, server_signer.clone(), config);

        let msg = McpMessage::Notification {
            jsonrpc: "2.0".into(),
            method: "notifications/initialized".into(),
            params: None,
        };
        let tags = vec![vec!["p".to_string(), server_signer.public_key().to_string()]];
        let template = codec::encode(client.public_key(), &msg, codec::KIND_RPC, tags).unwrap();
        let event = client.sign(template).unwrap();

        transport.handle_inbound(event).await;
        assert!(transport.sessions.lock().await.is_empty());
    }
}
