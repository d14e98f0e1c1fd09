//! JSON-RPC 2.0 message shapes carried as event content.
//!
//! Kept deliberately thin: this crate bridges transport, it does not
//! implement MCP semantics itself. Request/notification/response framing
//! follows the familiar one-object-per-message JSON-RPC shape, just carried
//! as event content instead of over a pipe.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

pub const MCP_PARSE_ERROR: i64 = -32700;
pub const MCP_INVALID_REQUEST: i64 = -32600;
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;
pub const MCP_INVALID_PARAMS: i64 = -32602;
pub const MCP_INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 message, distinguished by shape: has `method` and `id` ->
/// request; has `method`, no `id` -> notification; has `result` or `error`
/// (and an `id`) -> response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum McpMessage {
    Request {
        jsonrpc: String,
        id: Value,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Notification {
        jsonrpc: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        jsonrpc: String,
        id: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<McpError>,
    },
}

impl McpMessage {
    /// The JSON-RPC id, if this message carries one (requests and
    /// responses; notifications never do).
    pub fn id(&self) -> Option<&Value> {
        match self {
            McpMessage::Request { id, .. } | McpMessage::Response { id, .. } => Some(id),
            McpMessage::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            McpMessage::Request { method, .. } | McpMessage::Notification { method, .. } => {
                Some(method)
            }
            McpMessage::Response { .. } => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, McpMessage::Request { .. })
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, McpMessage::Notification { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self, McpMessage::Response { .. })
    }

    /// Returns a copy of this message with `id` replaced. Used by the
    /// server transport to overwrite the remote client's JSON-RPC id with
    /// the inbound event id, and to later restore the original.
    pub fn with_id(&self, new_id: Value) -> McpMessage {
        match self {
            McpMessage::Request { jsonrpc, method, params, .. } => McpMessage::Request {
                jsonrpc: jsonrpc.clone(),
                id: new_id,
                method: method.clone(),
                params: params.clone(),
            },
            McpMessage::Response { jsonrpc, result, error, .. } => McpMessage::Response {
                jsonrpc: jsonrpc.clone(),
                id: new_id,
                result: result.clone(),
                error: error.clone(),
            },
            McpMessage::Notification { .. } => self.clone(),
        }
    }

    /// The `params._meta.progressToken` value, if present on a request.
    /// Progress tokens may be strings or numbers on the wire; both are
    /// normalized to their string form for use as a map key.
    pub fn progress_token(&self) -> Option<String> {
        self.meta_string("progressToken")
    }

    /// The `params._meta.relatedRequestId` value, if present on a
    /// notification. Carries the overloaded request id (the inbound event
    /// id) a request-scoped notification like `notifications/payment_required`
    /// refers back to, since the id a local MCP server sees on that request
    /// already is the event id.
    pub fn related_request_id(&self) -> Option<String> {
        self.meta_string("relatedRequestId")
    }

    fn meta_string(&self, key: &str) -> Option<String> {
        let params = match self {
            McpMessage::Request { params, .. } | McpMessage::Notification { params, .. } => {
                params.as_ref()?
            }
            McpMessage::Response { .. } => return None,
        };
        let value = params.get("_meta")?.get(key)?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Whether `message` is a response shaped like an MCP `initialize` result
/// (carries a `serverInfo` or `protocolVersion` field), used by both
/// transports to recognize the handshake response without coupling to MCP's
/// own types.
pub fn is_initialize_result(message: &McpMessage) -> bool {
    matches!(
        message,
        McpMessage::Response { result: Some(r), .. }
            if r.get("serverInfo").is_some() || r.get("protocolVersion").is_some()
    )
}

impl<'de> Deserialize<'de> for McpMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let obj = value.as_object().ok_or_else(|| {
            serde::de::Error::custom("MCP message must be a JSON object")
        })?;

        let jsonrpc = obj
            .get("jsonrpc")
            .and_then(Value::as_str)
            .unwrap_or("2.0")
            .to_string();

        let has_id = obj.contains_key("id");
        let has_method = obj.get("method").is_some();

        if has_method {
            let method = obj
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| serde::de::Error::custom("method must be a string"))?
                .to_string();
            let params = obj.get("params").cloned();
            if has_id {
                Ok(McpMessage::Request { jsonrpc, id: obj["id"].clone(), method, params })
            } else {
                Ok(McpMessage::Notification { jsonrpc, method, params })
            }
        } else if has_id && (obj.contains_key("result") || obj.contains_key("error")) {
            let error = match obj.get("error") {
                Some(e) => Some(
                    serde_json::from_value(e.clone())
                        .map_err(|e| serde::de::Error::custom(format!("invalid error object: {e}")))?,
                ),
                None => None,
            };
            Ok(McpMessage::Response {
                jsonrpc,
                id: obj["id"].clone(),
                result: obj.get("result").cloned(),
                error,
            })
        } else {
            Err(serde::de::Error::custom(
                "not a recognizable JSON-RPC request, notification, or response",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request() {
        let raw = json!({"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}});
        let msg: McpMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.id(), Some(&json!(7)));
    }

    #[test]
    fn parses_notification() {
        let raw = json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let msg: McpMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.is_notification());
        assert_eq!(msg.id(), None);
    }

    #[test]
    fn parses_response_with_result() {
        let raw = json!({"jsonrpc":"2.0","id":7,"result":{"tools":[]}});
        let msg: McpMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.is_response());
    }

    #[test]
    fn extracts_progress_token() {
        let raw = json!({
            "jsonrpc":"2.0","id":1,"method":"tools/call",
            "params": {"_meta": {"progressToken": "t-42"}}
        });
        let msg: McpMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.progress_token(), Some("t-42".to_string()));
    }

    #[test]
    fn with_id_replaces_only_id() {
        let raw = json!({"jsonrpc":"2.0","id":7,"method":"tools/list"});
        let msg: McpMessage = serde_json::from_value(raw).unwrap();
        let rewritten = msg.with_id(json!("event-abc"));
        assert_eq!(rewritten.id(), Some(&json!("event-abc")));
        assert_eq!(rewritten.method(), Some("tools/list"));
    }
}
