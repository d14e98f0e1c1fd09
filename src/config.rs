//! Configuration surface.
//!
//! Each struct derives `serde::Deserialize` so a host application can load
//! it from its own TOML/JSON/env layer. This crate has no CLI of its own,
//! so construction is always programmatic.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a transport treats gift-wrap (kind 1059) encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EncryptionMode {
    /// Never encrypt outbound; reject inbound encrypted events.
    Disabled,
    /// Encrypt when the peer is known to accept it or the inbound request
    /// arrived encrypted; decrypt inbound encrypted events. Default.
    #[default]
    Optional,
    /// Always encrypt outbound; reject inbound cleartext.
    Required,
}

/// Human-facing metadata published on a server's discovery announcement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub about: Option<String>,
    pub website: Option<String>,
    pub picture: Option<String>,
}

/// Capability-pricing metadata for one priced tool/resource/prompt, used to
/// populate a `cap` tag on discovery events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPrice {
    pub price: String,
    pub currency: String,
}

/// Signer construction options. A missing secret means "generate one".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerConfig {
    pub secret_key_hex: Option<String>,
}

/// Relay pool construction options plus the fixed timing constants governing
/// connect attempts and reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPoolConfig {
    pub relay_urls: Vec<String>,
}

impl RelayPoolConfig {
    /// Relay connect attempt timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// How often the reconnect supervisor sweeps relay state.
    pub const SUPERVISOR_TICK: Duration = Duration::from_secs(5);
    /// Initial backoff before the first reconnect attempt.
    pub const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
    /// Backoff cap after repeated doubling.
    pub const RECONNECT_MAX: Duration = Duration::from_secs(30);
    /// Attempts per relay before it is abandoned with a warning.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
}

/// Server transport construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerTransportConfig {
    pub server_info: Option<ServerInfo>,
    #[serde(default)]
    pub is_public_server: bool,
    pub allowed_public_keys: Option<HashSet<String>>,
    #[serde(default)]
    pub encryption_mode: EncryptionMode,
    #[serde(default)]
    pub capability_pricing: HashMap<String, CapabilityPrice>,
    #[serde(default = "ServerTransportConfig::default_session_timeout")]
    pub session_timeout: Duration,
}

impl ServerTransportConfig {
    /// Session inactivity timeout: 5 minutes.
    pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);
    /// How long announcement bootstrap waits for the local server to
    /// initialize before proceeding anyway.
    pub const ANNOUNCEMENT_INIT_WAIT: Duration = Duration::from_secs(10);

    fn default_session_timeout() -> Duration {
        Self::DEFAULT_SESSION_TIMEOUT
    }
}

/// Client transport construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTransportConfig {
    pub server_pubkey: String,
    #[serde(default)]
    pub encryption_mode: EncryptionMode,
}
