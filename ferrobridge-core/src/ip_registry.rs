//! Registered client IPs used for optional access control on link dispatch

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ferrobridge_common::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::Arc;

/// IP string to registration expiry
#[derive(Debug, Clone, Default)]
pub struct RegisteredIps {
    entries: Arc<DashMap<String, DateTime<Utc>>>,
}

impl RegisteredIps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ip` for `hours` from now, replacing any earlier entry.
    pub fn register(&self, ip: impl Into<String>, hours: i32) -> DateTime<Utc> {
        let expiry = Utc::now() + Duration::hours(i64::from(hours));
        self.register_until(ip, expiry);
        expiry
    }

    pub fn register_until(&self, ip: impl Into<String>, expiry: DateTime<Utc>) {
        self.entries.insert(ip.into(), expiry);
    }

    pub fn expiry(&self, ip: &str) -> Option<DateTime<Utc>> {
        self.entries.get(ip).map(|r| *r)
    }

    /// Accept `ip` only if it is registered with an expiry after `now`.
    pub fn verify(&self, ip: &str, now: DateTime<Utc>) -> Result<()> {
        match self.expiry(ip) {
            None => Err(BridgeError::IpNotRegistered(ip.to_string())),
            Some(expiry) if expiry <= now => Err(BridgeError::IpExpired(ip.to_string())),
            Some(_) => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip the port from an address, tolerating bare IPs and bracketed IPv6.
pub fn ip_of(addr: &str) -> String {
    if let Ok(sock) = addr.parse::<SocketAddr>() {
        return sock.ip().to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_string()
        }
        _ => addr.trim_matches(|c| c == '[' || c == ']').to_string(),
    }
}
