//! Default ports, addresses and limits for FerroBridge services.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the core library, the server binary and the tests.

use crate::ClientId;

/// Default port for the bridge control plane.
pub const DEFAULT_BRIDGE_PORT: u16 = 8024;

/// Default bind address for the bridge control plane (`0.0.0.0:8024`).
pub const DEFAULT_BRIDGE_BIND: &str = "0.0.0.0:8024";

/// Default UDP rendezvous port announced to P2P peers.
pub const DEFAULT_P2P_PORT: u16 = 6000;

/// Default UDP rendezvous address announced to P2P peers (`0.0.0.0:6000`).
pub const DEFAULT_P2P_BIND: &str = "0.0.0.0:6000";

/// Protocol version string a client must declare during the handshake.
pub const DEFAULT_BRIDGE_VERSION: &str = "0.26.0";

/// Upper bound for any length-prefixed message read from a client (32 KiB).
pub const MAX_MESSAGE_LEN: usize = 32 << 10;

/// Store id reserved for the shared/public client.
pub const PUBLIC_CLIENT_ID: ClientId = 0;
