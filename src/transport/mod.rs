//! Transport layer. A base transport shared by the client and server sides,
//! each of which adds its own correlation/session semantics.

pub mod base;
pub mod client;
pub mod server;

pub use base::BaseTransport;
pub use client::ClientTransport;
pub use server::ServerTransport;
