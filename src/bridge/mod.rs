//! Bridge orchestrators. Thin glue wiring a transport to its local
//! collaborator (a local duplex channel on the client side, a local MCP
//! server instance on the server side). Both collaborators live outside
//! this crate; only the seam is defined here.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::mcp::McpMessage;
use crate::transport::{ClientTransport, ServerTransport};

/// What a client-side orchestrator hands inbound responses/notifications
/// to. A thin command-line wrapper implements this over stdio; tests
/// implement it over an in-memory channel.
#[async_trait]
pub trait LocalCaller: Send + Sync {
    async fn deliver(&self, message: McpMessage);
}

/// Pumps [`ClientTransport::recv`] into a [`LocalCaller`] until the
/// transport is shut down or the channel closes.
pub struct ClientBridge {
    transport: Arc<ClientTransport>,
    caller: Arc<dyn LocalCaller>,
}

impl ClientBridge {
    pub fn new(transport: Arc<ClientTransport>, caller: Arc<dyn LocalCaller>) -> Self {
        Self { transport, caller }
    }

    /// Start the transport and run the pump loop until it closes.
    pub async fn run(&self) {
        self.transport.start().await;
        while let Some(message) = self.transport.recv().await {
            self.caller.deliver(message).await;
        }
    }

    pub async fn send(&self, message: McpMessage) -> crate::error::Result<String> {
        self.transport.send(message).await
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

/// What a server-side orchestrator forwards rewritten requests and
/// notifications to. A local in-process MCP server implements this; its
/// replies flow back through [`ServerBridge::pump_replies`].
#[async_trait]
pub trait LocalMcpServer: Send + Sync {
    async fn handle(&self, message: McpMessage);
}

/// Wires a [`ServerTransport`] to a [`LocalMcpServer`]: forwards inbound
/// traffic one way, and expects the server to call back into
/// [`ServerTransport::send`] (typically via a handle it was constructed
/// with) for outbound responses and notifications.
pub struct ServerBridge {
    transport: Arc<ServerTransport>,
    server: Arc<dyn LocalMcpServer>,
}

impl ServerBridge {
    pub fn new(transport: Arc<ServerTransport>, server: Arc<dyn LocalMcpServer>) -> Self {
        Self { transport, server }
    }

    /// Start the transport and run the forward-to-local pump loop.
    pub async fn run(&self) {
        self.transport.start().await;
        while let Some(message) = self.transport.recv_for_local().await {
            self.server.handle(message).await;
        }
        warn!("server bridge: local channel closed, pump exiting");
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}
