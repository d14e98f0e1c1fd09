//! Relay pool. Maintains a websocket connection to every configured relay,
//! re-subscribing and deduplicating across relays transparently so callers
//! see one merged event stream.
//!
//! Each relay gets its own connect/read/write loop
//! (`tokio_tungstenite::connect_async`, `StreamExt::split`, `tokio::select!`
//! between inbound/outbound tasks) under a reconnect supervisor that tracks
//! per-relay backoff state independently and gives up on relays that stay
//! unreachable past a fixed retry cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::config::RelayPoolConfig;
use crate::error::BridgeError;
use crate::event::{Event, Filter};

const SUBSCRIPTION_ID: &str = "bridge";
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SEEN_ID_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayStatus {
    Disconnected,
    Connected,
    Abandoned,
}

struct RelayState {
    status: RelayStatus,
    retry_count: u32,
    reconnect_interval: Duration,
    next_attempt_at: Instant,
    outbound: Option<mpsc::Sender<Message>>,
}

impl RelayState {
    fn fresh() -> Self {
        Self {
            status: RelayStatus::Disconnected,
            retry_count: 0,
            reconnect_interval: RelayPoolConfig::RECONNECT_INITIAL,
            next_attempt_at: Instant::now(),
            outbound: None,
        }
    }
}

/// Outcome of a single relay's OK response to a publish, fed back to
/// whichever `publish` call is waiting on this event id.
#[derive(Clone)]
struct PublishAck {
    event_id: String,
    accepted: bool,
}

/// Maintains connections to a fixed set of relays, presenting one
/// deduplicated inbound event stream and a fan-out publish/subscribe API.
pub struct RelayPool {
    config: RelayPoolConfig,
    states: Arc<Mutex<HashMap<String, RelayState>>>,
    events_tx: broadcast::Sender<Event>,
    ack_tx: broadcast::Sender<PublishAck>,
    filters: Arc<Mutex<Vec<Filter>>>,
    seen_ids: Arc<Mutex<HashSet<String>>>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayPool {
    pub fn new(config: RelayPoolConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (ack_tx, _) = broadcast::channel(256);
        let states = config
            .relay_urls
            .iter()
            .map(|url| (url.clone(), RelayState::fresh()))
            .collect();

        Arc::new(Self {
            config,
            states: Arc::new(Mutex::new(states)),
            events_tx,
            ack_tx,
            filters: Arc::new(Mutex::new(Vec::new())),
            seen_ids: Arc::new(Mutex::new(HashSet::new())),
            supervisor: Mutex::new(None),
        })
    }

    /// Start the reconnect supervisor and attempt an initial connection to
    /// every configured relay. Idempotent — calling twice is a no-op.
    pub async fn connect(self: &Arc<Self>) {
        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            return;
        }
        let pool = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { pool.supervisor_loop().await }));
    }

    /// Stop the supervisor and drop all outbound senders; in-flight reader
    /// tasks notice the closed socket and exit on their own.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            state.outbound = None;
            state.status = RelayStatus::Disconnected;
        }
    }

    async fn supervisor_loop(self: Arc<Self>) {
        // Fire immediately so startup doesn't wait a full tick.
        self.sweep().await;
        let mut ticker = tokio::time::interval(RelayPoolConfig::SUPERVISOR_TICK);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(self: &Arc<Self>) {
        let due: Vec<String> = {
            let states = self.states.lock().await;
            let now = Instant::now();
            states
                .iter()
                .filter(|(_, s)| s.status != RelayStatus::Connected && s.status != RelayStatus::Abandoned)
                .filter(|(_, s)| s.next_attempt_at <= now)
                .map(|(url, _)| url.clone())
                .collect()
        };
        for url in due {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.try_connect(url).await });
        }
    }

    async fn try_connect(self: Arc<Self>, url: String) {
        debug!(relay = %url, "relay: connecting");
        let attempt = tokio::time::timeout(RelayPoolConfig::CONNECT_TIMEOUT, connect_async(&url)).await;

        let ws_stream = match attempt {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                self.record_failure(&url, &format!("{e}")).await;
                return;
            }
            Err(_) => {
                self.record_failure(&url, "connect timed out").await;
                return;
            }
        };

        info!(relay = %url, "relay: connected");
        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(128);

        {
            let mut states = self.states.lock().await;
            if let Some(state) = states.get_mut(&url) {
                state.status = RelayStatus::Connected;
                state.retry_count = 0;
                state.reconnect_interval = RelayPoolConfig::RECONNECT_INITIAL;
                state.outbound = Some(out_tx.clone());
            }
        }

        // Resubscribe with whatever filters are currently active.
        let filters = self.filters.lock().await.clone();
        if !filters.is_empty() {
            let _ = out_tx.send(Message::Text(req_frame(&filters))).await;
        }

        let pool = Arc::clone(&self);
        let url_for_reader = url.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => pool.handle_frame(&url_for_reader, &text).await,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        tokio::select! {
            _ = reader => {}
            _ = writer => {}
        }

        warn!(relay = %url, "relay: connection lost");
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&url) {
            state.outbound = None;
            state.status = RelayStatus::Disconnected;
            state.next_attempt_at = Instant::now() + state.reconnect_interval;
        }
    }

    async fn record_failure(&self, url: &str, reason: &str) {
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(url) else { return };
        state.retry_count += 1;
        if state.retry_count > RelayPoolConfig::MAX_RECONNECT_ATTEMPTS {
            state.status = RelayStatus::Abandoned;
            warn!(relay = %url, attempts = state.retry_count, "relay: abandoning after repeated failures: {reason}");
            return;
        }
        state.reconnect_interval =
            (state.reconnect_interval * 2).min(RelayPoolConfig::RECONNECT_MAX);
        state.next_attempt_at = Instant::now() + state.reconnect_interval;
        debug!(relay = %url, attempt = state.retry_count, reason, "relay: connect attempt failed, backing off");
    }

    async fn handle_frame(&self, relay: &str, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(relay, "relay: unparseable frame: {e}");
                return;
            }
        };
        let Some(tag) = frame.get(0).and_then(Value::as_str) else { return };
        match tag {
            "EVENT" => {
                let Some(raw) = frame.get(2) else { return };
                let event: Event = match serde_json::from_value(raw.clone()) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(relay, "relay: malformed EVENT payload: {e}");
                        return;
                    }
                };
                if event.check_well_formed().is_err() {
                    warn!(relay, id = %event.id, "relay: dropping malformed event");
                    return;
                }
                if crate::signer::Signer::verify(&event).is_err() {
                    warn!(relay, id = %event.id, "relay: dropping event with invalid signature");
                    return;
                }
                let is_new = {
                    let mut seen = self.seen_ids.lock().await;
                    if seen.len() > SEEN_ID_CAP {
                        seen.clear();
                    }
                    seen.insert(event.id.clone())
                };
                if is_new {
                    trace!(relay, id = %event.id, kind = event.kind, "relay: new event");
                    let _ = self.events_tx.send(event);
                }
            }
            "OK" => {
                let event_id = frame.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                let accepted = frame.get(2).and_then(Value::as_bool).unwrap_or(false);
                if !accepted {
                    let msg = frame.get(3).and_then(Value::as_str).unwrap_or_default();
                    debug!(relay, event_id, msg, "relay: publish rejected");
                }
                let _ = self.ack_tx.send(PublishAck { event_id, accepted });
            }
            "NOTICE" => {
                let notice = frame.get(1).and_then(Value::as_str).unwrap_or_default();
                debug!(relay, notice, "relay: NOTICE");
            }
            "EOSE" => {
                trace!(relay, "relay: end of stored events");
            }
            other => {
                trace!(relay, other, "relay: unhandled frame type");
            }
        }
    }

    /// Publish `event` to every connected relay. Resolves once every relay
    /// that accepted the event has replied or the timeout elapses; errors
    /// only if every relay that saw the event rejected it (or none were
    /// connected to begin with).
    pub async fn publish(&self, event: &Event) -> Result<(), BridgeError> {
        let senders: Vec<mpsc::Sender<Message>> = {
            let states = self.states.lock().await;
            states.values().filter_map(|s| s.outbound.clone()).collect()
        };
        if senders.is_empty() {
            return Err(BridgeError::RelayPublishError);
        }

        let mut acks = self.ack_tx.subscribe();
        let frame = json!(["EVENT", event]).to_string();
        for sender in &senders {
            let _ = sender.send(Message::Text(frame.clone())).await;
        }

        let expected = senders.len();
        let mut seen = 0usize;
        let mut any_accepted = false;
        let deadline = tokio::time::sleep(Duration::from_secs(10));
        tokio::pin!(deadline);

        loop {
            if any_accepted || seen >= expected {
                break;
            }
            tokio::select! {
                ack = acks.recv() => {
                    match ack {
                        Ok(ack) if ack.event_id == event.id => {
                            seen += 1;
                            if ack.accepted {
                                any_accepted = true;
                            }
                        }
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        if any_accepted {
            Ok(())
        } else {
            Err(BridgeError::RelayPublishError)
        }
    }

    /// Replace the active subscription filters and (re)issue `REQ` to every
    /// connected relay. The returned receiver yields deduplicated,
    /// signature-verified events from any relay.
    pub async fn subscribe(&self, filters: Vec<Filter>) -> broadcast::Receiver<Event> {
        *self.filters.lock().await = filters.clone();
        let senders: Vec<mpsc::Sender<Message>> = {
            let states = self.states.lock().await;
            states.values().filter_map(|s| s.outbound.clone()).collect()
        };
        let frame = req_frame(&filters);
        for sender in &senders {
            let _ = sender.send(Message::Text(frame.clone())).await;
        }
        self.events_tx.subscribe()
    }

    /// Close the active subscription on every connected relay and forget
    /// the filter set (no resubscription happens on future reconnects).
    pub async fn unsubscribe_all(&self) {
        self.filters.lock().await.clear();
        let senders: Vec<mpsc::Sender<Message>> = {
            let states = self.states.lock().await;
            states.values().filter_map(|s| s.outbound.clone()).collect()
        };
        let frame = json!(["CLOSE", SUBSCRIPTION_ID]).to_string();
        for sender in &senders {
            let _ = sender.send(Message::Text(frame.clone())).await;
        }
    }
}

fn req_frame(filters: &[Filter]) -> String {
    let mut arr = vec![json!("REQ"), json!(SUBSCRIPTION_ID)];
    arr.extend(filters.iter().map(|f| serde_json::to_value(f).unwrap_or(Value::Null)));
    Value::Array(arr).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_frame_embeds_subscription_id_and_filters() {
        let filters = vec![Filter::new().kinds(vec![1, 2]).since(100)];
        let frame = req_frame(&filters);
        assert!(frame.starts_with("[\"REQ\",\"bridge\""));
        assert!(frame.contains("\"since\":100"));
    }

    #[tokio::test]
    async fn publish_with_no_connected_relays_errors() {
        let pool = RelayPool::new(RelayPoolConfig { relay_urls: vec![] });
        let signer = crate::signer::Signer::generate();
        let template = crate::event::UnsignedEvent::new(signer.public_key(), 1, vec![], "hi");
        let event = signer.sign(template).unwrap();
        assert!(pool.publish(&event).await.is_err());
    }
}
