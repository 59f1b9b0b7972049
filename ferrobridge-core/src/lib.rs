//! `FerroBridge` core
//!
//! The bridge side of the reverse-tunnel control plane: handshake and
//! framed transport, the session registry, the health monitor, the dynamic
//! config sub-protocol, NAT traversal coordination and outbound link
//! dispatch.

pub mod auth;
pub mod bridge;
pub mod ip_registry;
pub mod model;
pub mod ports;
pub mod session;
pub mod store;
pub mod stream;
pub mod transport;

// Re-export specific items for convenience
pub use bridge::{Bridge, BridgeHandoffs, RunningTasks, SecretLink};
pub use ip_registry::RegisteredIps;
pub use model::{Client, Host, Target, Tunnel};
pub use session::{ClientSession, SessionRegistry};
pub use store::{MemoryStore, Store};
pub use stream::{Multiplexer, VirtualStream};
