//! A minimal in-process relay used by the end-to-end scenario tests.
//! Speaks just enough of the NIP-01 relay wire protocol for the bridge's
//! own `RelayPool` to drive it: acknowledges every `EVENT` with `OK`,
//! answers `REQ` with an immediate `EOSE`, and rebroadcasts every accepted
//! event to all connected clients (including the publisher, like a real
//! relay would).

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

pub struct MockRelay {
    pub url: String,
}

pub async fn start_mock_relay() -> MockRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock relay");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("ws://{addr}");

    let (event_tx, _) = broadcast::channel::<String>(1024);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(handle_conn(stream, event_tx.clone()));
        }
    });

    MockRelay { url }
}

async fn handle_conn(stream: tokio::net::TcpStream, event_tx: broadcast::Sender<String>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
    let (mut sink, mut stream) = ws.split();
    let mut rx = event_tx.subscribe();

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                        match frame.get(0).and_then(Value::as_str) {
                            Some("EVENT") => {
                                if let Some(event) = frame.get(1) {
                                    let id = event.get("id").and_then(Value::as_str).unwrap_or_default();
                                    let ok = json!(["OK", id, true, ""]).to_string();
                                    if sink.send(Message::Text(ok)).await.is_err() {
                                        break;
                                    }
                                    let rebroadcast = json!(["EVENT", "bridge", event]).to_string();
                                    let _ = event_tx.send(rebroadcast);
                                }
                            }
                            Some("REQ") => {
                                let sub_id = frame.get(1).and_then(Value::as_str).unwrap_or("bridge");
                                let eose = json!(["EOSE", sub_id]).to_string();
                                if sink.send(Message::Text(eose)).await.is_err() {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
