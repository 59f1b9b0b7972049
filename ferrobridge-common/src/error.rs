//! Error types for `FerroBridge`

use crate::ClientId;
use thiserror::Error;

/// Main error type for `FerroBridge` operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client declared a different bridge version
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    /// Verify key lookup failed
    #[error("Verification failed: {0}")]
    Verify(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Persisted store rejected or could not find a record
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A handoff queue has no consumer left
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Requester IP never registered
    #[error("The ip {0} is not in the validation list")]
    IpNotRegistered(String),

    /// Requester IP registration has lapsed
    #[error("The validity of the ip {0} has expired")]
    IpExpired(String),

    /// No session for the target client
    #[error("The client {0} is not connected")]
    ClientNotConnected(ClientId),

    /// Session exists but lacks the required multiplex carrier
    #[error("The client {0} is not fully connected")]
    ClientNotFullyConnected(ClientId),

    /// The link descriptor could not be forwarded to the client
    #[error("The target {0} refused to connect")]
    DialRefused(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<bincode_next::error::EncodeError> for BridgeError {
    fn from(err: bincode_next::error::EncodeError) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<bincode_next::error::DecodeError> for BridgeError {
    fn from(err: bincode_next::error::DecodeError) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}
