//! Bridges JSON-RPC MCP traffic over the Nostr relay network.
//!
//! See `README`/`DESIGN.md` for the component map. Roughly: [`signer`]
//! produces and verifies signed events; [`relay`] keeps websocket
//! connections to a configured set of relays alive; [`codec`] turns MCP
//! messages into event bodies (and back), including gift-wrap encryption;
//! [`transport`] layers client/server session semantics on top; [`bridge`]
//! wires a transport to its local collaborator.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod mcp;
pub mod relay;
pub mod signer;
pub mod transport;

pub use error::{BridgeError, Result};
pub use event::Event;
pub use mcp::McpMessage;
