//! Configuration types for the `FerroBridge` control plane

use crate::constants::{
    DEFAULT_BRIDGE_PORT, DEFAULT_BRIDGE_VERSION, DEFAULT_P2P_PORT, MAX_MESSAGE_LEN,
};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address the control port listens on
    pub bind_addr: SocketAddr,
    /// UDP rendezvous address announced to P2P peers
    pub p2p_addr: SocketAddr,
    /// Version string clients must declare during the handshake
    pub version: String,
    /// Require a registered, unexpired IP before dispatching links
    pub ip_verify: bool,
    /// Ports tasks may bind; empty means every port is allowed
    pub allowed_ports: BTreeSet<u16>,
    /// Read deadline while a connection is still in the handshake
    pub handshake_timeout: Duration,
    /// Period of the liveness sweep
    pub check_interval: Duration,
    /// Idle period after which a multiplex carrier is considered closed
    pub disconnect_timeout: Duration,
    /// Give up on an unmatched secret token after this long (`None` waits forever)
    pub secret_match_timeout: Option<Duration>,
    /// Upper bound on any length-prefixed message
    pub max_message_len: usize,
}

impl BridgeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(BridgeError::Config("version is required".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(BridgeError::Config(
                "handshake_timeout must be greater than zero".into(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(BridgeError::Config(
                "check_interval must be greater than zero".into(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(BridgeError::Config(
                "max_message_len must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_BRIDGE_PORT).into(),
            p2p_addr: ([0, 0, 0, 0], DEFAULT_P2P_PORT).into(),
            version: DEFAULT_BRIDGE_VERSION.to_string(),
            ip_verify: false,
            allowed_ports: BTreeSet::new(),
            handshake_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(60),
            secret_match_timeout: None,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}
