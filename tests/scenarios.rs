//! End-to-end scenarios run against an in-process mock relay
//! (`tests/common`) standing in for a real relay network.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::time::sleep;

use mcp_nostr_bridge::config::{ClientTransportConfig, EncryptionMode, RelayPoolConfig, ServerTransportConfig};
use mcp_nostr_bridge::mcp::McpMessage;
use mcp_nostr_bridge::relay::RelayPool;
use mcp_nostr_bridge::signer::Signer;
use mcp_nostr_bridge::transport::{ClientTransport, ServerTransport};

use common::start_mock_relay;

fn server_config() -> ServerTransportConfig {
    ServerTransportConfig {
        server_info: None,
        is_public_server: false,
        allowed_public_keys: None,
        encryption_mode: EncryptionMode::Optional,
        capability_pricing: Default::default(),
        session_timeout: Duration::from_secs(300),
    }
}

async fn connected_pool(url: &str) -> Arc<RelayPool> {
    let pool = RelayPool::new(RelayPoolConfig { relay_urls: vec![url.to_string()] });
    pool.connect().await;
    // Give the background connect task time to finish the websocket handshake.
    sleep(Duration::from_millis(300)).await;
    pool
}

/// Drives `tools/list` and a toy `add` tool, plus a `do_work` tool that
/// reports progress before replying — enough surface to exercise plain
/// request/response, concurrent sessions, and progress routing without
/// depending on a real MCP server implementation.
async fn run_toy_local_server(server: Arc<ServerTransport>) {
    while let Some(msg) = server.recv_for_local().await {
        let McpMessage::Request { id, method, params, .. } = &msg else { continue };
        match method.as_str() {
            "tools/list" => {
                let response = McpMessage::Response {
                    jsonrpc: "2.0".into(),
                    id: id.clone(),
                    result: Some(json!({"tools": [{"name": "add"}]})),
                    error: None,
                };
                let _ = server.send(response).await;
            }
            "tools/call" => {
                let args = params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                let response = McpMessage::Response {
                    jsonrpc: "2.0".into(),
                    id: id.clone(),
                    result: Some(json!({"sum": a + b})),
                    error: None,
                };
                let _ = server.send(response).await;
            }
            "do_work" => {
                let token = params
                    .as_ref()
                    .and_then(|p| p.get("_meta"))
                    .and_then(|m| m.get("progressToken"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id = id.clone();
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    for progress in 1..=2 {
                        let note = McpMessage::Notification {
                            jsonrpc: "2.0".into(),
                            method: "notifications/progress".into(),
                            params: Some(json!({"_meta": {"progressToken": token}, "progress": progress})),
                        };
                        let _ = server.send(note).await;
                        sleep(Duration::from_millis(20)).await;
                    }
                    let response = McpMessage::Response {
                        jsonrpc: "2.0".into(),
                        id,
                        result: Some(json!({"done": true})),
                        error: None,
                    };
                    let _ = server.send(response).await;
                });
            }
            _ => {}
        }
    }
}

/// A single client's `tools/list` request round-trips with its original
/// JSON-RPC id and the expected result.
#[tokio::test]
async fn plain_tools_list_round_trips() {
    let relay = start_mock_relay().await;
    let server_signer = Arc::new(Signer::generate());

    let server = ServerTransport::new(connected_pool(&relay.url).await, server_signer.clone(), server_config());
    server.start().await;
    tokio::spawn(run_toy_local_server(Arc::clone(&server)));

    let client = ClientTransport::new(
        connected_pool(&relay.url).await,
        Arc::new(Signer::generate()),
        ClientTransportConfig {
            server_pubkey: server_signer.public_key().to_string(),
            encryption_mode: EncryptionMode::Optional,
        },
    );
    client.start().await;
    sleep(Duration::from_millis(200)).await;

    client
        .send(McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!(7),
            method: "tools/list".into(),
            params: Some(json!({})),
        })
        .await
        .expect("publish request");

    let response = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("response within timeout")
        .expect("channel stays open");

    match response {
        McpMessage::Response { id, result, .. } => {
            assert_eq!(id, json!(7));
            assert_eq!(result, Some(json!({"tools": [{"name": "add"}]})));
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

/// Five clients call `add` at once; each gets back its own sum under its own
/// JSON-RPC id, with no cross-talk between sessions.
#[tokio::test]
async fn concurrent_clients_get_independent_responses() {
    let relay = start_mock_relay().await;
    let server_signer = Arc::new(Signer::generate());

    let server = ServerTransport::new(connected_pool(&relay.url).await, server_signer.clone(), server_config());
    server.start().await;
    tokio::spawn(run_toy_local_server(Arc::clone(&server)));

    let calls = (1i64..=5).map(|i| {
        let server_pubkey = server_signer.public_key().to_string();
        let relay_url = relay.url.clone();
        async move {
            let client = ClientTransport::new(
                connected_pool(&relay_url).await,
                Arc::new(Signer::generate()),
                ClientTransportConfig { server_pubkey, encryption_mode: EncryptionMode::Optional },
            );
            client.start().await;
            sleep(Duration::from_millis(200)).await;

            client
                .send(McpMessage::Request {
                    jsonrpc: "2.0".into(),
                    id: json!(i),
                    method: "tools/call".into(),
                    params: Some(json!({"name": "add", "arguments": {"a": i, "b": 10 * i}})),
                })
                .await
                .expect("publish request");

            let response = tokio::time::timeout(Duration::from_secs(5), client.recv())
                .await
                .expect("response within timeout")
                .expect("channel stays open");

            match response {
                McpMessage::Response { id, result, .. } => (id, result),
                other => panic!("expected a response, got {other:?}"),
            }
        }
    });

    let results = join_all(calls).await;
    for (i, (id, result)) in (1i64..=5).zip(results) {
        assert_eq!(id, json!(i));
        assert_eq!(result, Some(json!({"sum": i + 10 * i})));
    }
}

/// The requesting client sees exactly two progress notifications for its
/// token, then the final response, in order; a concurrent, unrelated client
/// never observes them.
#[tokio::test]
async fn progress_notifications_route_to_originating_client() {
    let relay = start_mock_relay().await;
    let server_signer = Arc::new(Signer::generate());

    let server = ServerTransport::new(connected_pool(&relay.url).await, server_signer.clone(), server_config());
    server.start().await;
    tokio::spawn(run_toy_local_server(Arc::clone(&server)));

    let client_a = ClientTransport::new(
        connected_pool(&relay.url).await,
        Arc::new(Signer::generate()),
        ClientTransportConfig {
            server_pubkey: server_signer.public_key().to_string(),
            encryption_mode: EncryptionMode::Optional,
        },
    );
    client_a.start().await;

    let client_b = ClientTransport::new(
        connected_pool(&relay.url).await,
        Arc::new(Signer::generate()),
        ClientTransportConfig {
            server_pubkey: server_signer.public_key().to_string(),
            encryption_mode: EncryptionMode::Optional,
        },
    );
    client_b.start().await;
    sleep(Duration::from_millis(200)).await;

    client_a
        .send(McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!("a-1"),
            method: "do_work".into(),
            params: Some(json!({"_meta": {"progressToken": "t-42"}})),
        })
        .await
        .expect("publish request");

    client_b
        .send(McpMessage::Request {
            jsonrpc: "2.0".into(),
            id: json!("b-1"),
            method: "tools/list".into(),
            params: Some(json!({})),
        })
        .await
        .expect("publish request");

    // Client B's own traffic is unrelated to A's progress token; it should
    // see nothing but its own response.
    let b_response = tokio::time::timeout(Duration::from_secs(5), client_b.recv())
        .await
        .expect("response within timeout")
        .expect("channel stays open");
    match b_response {
        McpMessage::Response { id, .. } => assert_eq!(id, json!("b-1")),
        other => panic!("client B should only see its own response, got {other:?}"),
    }

    let mut progress_values = Vec::new();
    for _ in 0..2 {
        let note = tokio::time::timeout(Duration::from_secs(5), client_a.recv())
            .await
            .expect("progress notification within timeout")
            .expect("channel stays open");
        match note {
            McpMessage::Notification { method, params, .. } => {
                assert_eq!(method, "notifications/progress");
                let progress = params.unwrap().get("progress").unwrap().as_i64().unwrap();
                progress_values.push(progress);
            }
            other => panic!("expected a progress notification, got {other:?}"),
        }
    }
    assert_eq!(progress_values, vec![1, 2]);

    let final_response = tokio::time::timeout(Duration::from_secs(5), client_a.recv())
        .await
        .expect("final response within timeout")
        .expect("channel stays open");
    match final_response {
        McpMessage::Response { id, result, .. } => {
            assert_eq!(id, json!("a-1"));
            assert_eq!(result, Some(json!({"done": true})));
        }
        other => panic!("expected final response, got {other:?}"),
    }
}
