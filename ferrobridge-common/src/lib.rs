//! Common utilities and types for `FerroBridge`

pub mod config;
pub mod constants;
pub mod error;

pub use config::BridgeConfig;
pub use constants::{
    DEFAULT_BRIDGE_BIND, DEFAULT_BRIDGE_PORT, DEFAULT_BRIDGE_VERSION, DEFAULT_P2P_BIND,
    DEFAULT_P2P_PORT, MAX_MESSAGE_LEN, PUBLIC_CLIENT_ID,
};
pub use error::{BridgeError, Result};

/// Identifier of a persisted client record.
pub type ClientId = i32;

/// Identifier of a persisted tunnel (task) record.
pub type TaskId = i32;
