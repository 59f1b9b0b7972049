//! Port specifications and the port allow-list policy

use ferrobridge_protocol::TunnelMode;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// Expand a port specification such as `"8001,8002"` or `"9000-9003"`.
///
/// Entries are separated by commas; `a-b` expands to the inclusive range.
/// Whitespace is ignored and entries that are not valid ports are skipped.
pub fn parse_ports(spec: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once('-') {
            Some((start, end)) => {
                let (Ok(start), Ok(end)) = (start.trim().parse::<u16>(), end.trim().parse::<u16>())
                else {
                    continue;
                };
                if start <= end {
                    ports.extend(start..=end);
                }
            }
            None => {
                if let Ok(port) = entry.parse::<u16>() {
                    ports.push(port);
                }
            }
        }
    }
    ports
}

/// Decides whether a task may bind a server port
#[derive(Debug, Clone, Default)]
pub struct PortPolicy {
    allowed: BTreeSet<u16>,
}

impl PortPolicy {
    /// An empty allow-list admits every port.
    pub fn new(allowed: BTreeSet<u16>) -> Self {
        Self { allowed }
    }

    pub fn is_allowed(&self, port: u16) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&port)
    }

    /// Port is allowed and can currently be bound for the task's protocol.
    pub fn is_available(&self, mode: TunnelMode, port: u16) -> bool {
        if port == 0 || !self.is_allowed(port) {
            return false;
        }
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        match mode {
            TunnelMode::Udp => UdpSocket::bind(addr).is_ok(),
            _ => TcpListener::bind(addr).is_ok(),
        }
    }
}
