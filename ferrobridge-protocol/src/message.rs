//! Records carried inside length-prefixed messages
//!
//! Records are JSON objects with PascalCase field names, matching what
//! deployed clients already send.

use crate::constants::CONN_DATA_SEQ;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Forwarding mode of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    #[default]
    Tcp,
    Udp,
    Secret,
    P2p,
    File,
}

impl TunnelMode {
    /// Secret and P2P tunnels are matched by token and never bind a server port.
    pub const fn binds_port(self) -> bool {
        !matches!(self, TunnelMode::Secret | TunnelMode::P2p)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TunnelMode::Tcp => "tcp",
            TunnelMode::Udp => "udp",
            TunnelMode::Secret => "secret",
            TunnelMode::P2p => "p2p",
            TunnelMode::File => "file",
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one outbound connection the client must open locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct Link {
    /// `tcp`, `udp` or `http`
    pub conn_type: String,
    /// Address the client should dial
    pub host: String,
    pub crypt: bool,
    pub compress: bool,
    /// Dial from the bridge host instead of through the client
    pub local_proxy: bool,
    /// Address of the party that triggered the link
    pub remote_addr: String,
}

impl Link {
    pub fn new(
        conn_type: impl Into<String>,
        host: impl Into<String>,
        crypt: bool,
        compress: bool,
        remote_addr: impl Into<String>,
        local_proxy: bool,
    ) -> Self {
        Self {
            conn_type: conn_type.into(),
            host: host.into(),
            crypt,
            compress,
            local_proxy,
            remote_addr: remote_addr.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Health telemetry reported by a client on its signal channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub target: String,
    pub up: bool,
}

impl HealthReport {
    /// Parse `"<target>*#*<status>"`; a status of `1` or `true` means up.
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut parts = text.split(CONN_DATA_SEQ);
        let target = parts.next()?;
        let status = parts.next()?;
        Some(Self {
            target: target.to_string(),
            up: matches!(status, "1" | "true"),
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.target,
            CONN_DATA_SEQ,
            if self.up { "1" } else { "0" }
        )
    }
}

/// Target specification as sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct TargetConfig {
    /// Newline-separated list of `host:port` or bare ports
    pub target_str: String,
    pub local_proxy: bool,
}

/// Client record submitted with `conf` inside the config sub-protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClientConfig {
    pub verify_key: String,
    pub remark: String,
    pub config_conn_allow: bool,
    pub max_tunnel_num: u32,
    pub crypt: bool,
    pub compress: bool,
}

/// Host record submitted with `host` inside the config sub-protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    pub host: String,
    pub location: String,
    /// `http`, `https` or `all`
    pub scheme: String,
    pub remark: String,
    pub host_change: String,
    pub header_change: String,
    pub cert_file_path: String,
    pub key_file_path: String,
    pub target: TargetConfig,
}

/// Task record submitted with `task` inside the config sub-protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskConfig {
    pub mode: TunnelMode,
    /// Port specification, e.g. `8001,8002` or `9000-9010`
    pub ports: String,
    pub server_ip: String,
    pub target: TargetConfig,
    /// Host prefix applied to each target port when fanning out
    pub target_addr: String,
    pub remark: String,
    pub password: String,
    pub local_path: String,
    pub strip_pre: String,
}
