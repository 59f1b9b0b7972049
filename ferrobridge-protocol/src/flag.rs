//! Four-byte ASCII flags used for work-type and config dispatch

use crate::constants::FLAG_LEN;
use std::fmt;

/// A raw 4-byte flag as read from the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flag(pub [u8; FLAG_LEN]);

impl Flag {
    pub const fn new(bytes: &[u8; FLAG_LEN]) -> Self {
        Self(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FLAG_LEN] {
        &self.0
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Purpose of a freshly verified bridge connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkType {
    /// Signal (control) channel
    Main,
    /// Tunnel multiplex carrier
    Chan,
    /// Dynamic config sub-protocol
    Config,
    /// IP allow-list registration
    Register,
    /// Direct-link secret token
    Secret,
    /// File multiplex carrier
    File,
    /// NAT rendezvous request
    P2p,
}

impl WorkType {
    pub const ALL: [WorkType; 7] = [
        WorkType::Main,
        WorkType::Chan,
        WorkType::Config,
        WorkType::Register,
        WorkType::Secret,
        WorkType::File,
        WorkType::P2p,
    ];

    pub const fn tag(self) -> &'static [u8; FLAG_LEN] {
        match self {
            WorkType::Main => b"main",
            WorkType::Chan => b"chan",
            WorkType::Config => b"conf",
            WorkType::Register => b"rgst",
            WorkType::Secret => b"sert",
            WorkType::File => b"file",
            WorkType::P2p => b"p2pm",
        }
    }

    pub fn from_flag(flag: Flag) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.tag() == flag.as_bytes())
    }

    /// Whether the deadline is cleared right after the handshake.
    ///
    /// Register and P2P requests are single exchanges and keep the deadline.
    /// A secret connection keeps it until its token has been read.
    pub const fn is_long_lived(self) -> bool {
        !matches!(self, WorkType::Register | WorkType::P2p | WorkType::Secret)
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.tag()))
    }
}

/// Requests accepted inside the config sub-protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFlag {
    /// Report the remarks of a client's hosts and running tunnels
    Status,
    /// Register a new client record
    NewConfig,
    /// Register a new host
    NewHost,
    /// Register one or more tunnels
    NewTask,
}

impl ConfigFlag {
    pub const ALL: [ConfigFlag; 4] = [
        ConfigFlag::Status,
        ConfigFlag::NewConfig,
        ConfigFlag::NewHost,
        ConfigFlag::NewTask,
    ];

    pub const fn tag(self) -> &'static [u8; FLAG_LEN] {
        match self {
            ConfigFlag::Status => b"stus",
            ConfigFlag::NewConfig => b"conf",
            ConfigFlag::NewHost => b"host",
            ConfigFlag::NewTask => b"task",
        }
    }

    pub fn from_flag(flag: Flag) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == flag.as_bytes())
    }
}
