//! Error taxonomy for the bridge.
//!
//! One variant per distinct failure mode callers need to branch on, plus
//! the transport-level plumbing errors. Library-public functions return
//! `Result<T, BridgeError>` throughout.

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("gift-wrap decryption failed: {0}")]
    DecryptFailed(String),

    #[error("sender not in allowed_public_keys: {0}")]
    Unauthorized(String),

    #[error("encryption policy mismatch: {0}")]
    EncryptionPolicyMismatch(String),

    #[error("no pending request for id {0}")]
    NoPendingRequest(String),

    #[error("every relay rejected the publish")]
    RelayPublishError,

    #[error("progress token '{0}' is not tracked by any session")]
    ProgressWithoutRequest(String),

    #[error("signing/verification error: {0}")]
    Signing(String),

    #[error("relay connection error: {0}")]
    Connection(String),

    #[error("operation timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
