//! Records the bridge reads from and writes to the store
//!
//! Tunnels and hosts share a [`Target`]: the raw target specification plus a
//! lazily materialized live list and a list of targets removed after a failed
//! health report. Each target carries its own lock.

use ferrobridge_common::{ClientId, TaskId};
use ferrobridge_protocol::{ClientConfig, HostConfig, TargetConfig, TunnelMode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Persisted client record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct Client {
    pub id: ClientId,
    pub verify_key: String,
    pub remark: String,
    #[serde(default = "enabled")]
    pub status: bool,
    pub config_conn_allow: bool,
    pub max_tunnel_num: u32,
    pub crypt: bool,
    pub compress: bool,
}

fn enabled() -> bool {
    true
}

impl Client {
    /// Build a record from a `conf` submission; the store assigns the id.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            id: 0,
            verify_key: config.verify_key,
            remark: config.remark,
            status: true,
            config_conn_allow: config.config_conn_allow,
            max_tunnel_num: config.max_tunnel_num,
            crypt: config.crypt,
            compress: config.compress,
        }
    }
}

/// Byte counters of a tunnel or host
#[derive(Debug, Default)]
pub struct Flow {
    inlet: AtomicU64,
    export: AtomicU64,
}

impl Flow {
    pub fn add(&self, inlet: u64, export: u64) {
        self.inlet.fetch_add(inlet, Ordering::Relaxed);
        self.export.fetch_add(export, Ordering::Relaxed);
    }

    pub fn inlet(&self) -> u64 {
        self.inlet.load(Ordering::Relaxed)
    }

    pub fn export(&self) -> u64 {
        self.export.load(Ordering::Relaxed)
    }
}

/// Health-driven view of a target specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetLists {
    /// `None` until the first failed health report
    pub live: Option<Vec<String>>,
    pub removed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Target {
    target_str: String,
    local_proxy: bool,
    lists: Mutex<TargetLists>,
}

impl Target {
    pub fn new(target_str: impl Into<String>) -> Self {
        Self {
            target_str: target_str.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: TargetConfig) -> Self {
        Self {
            target_str: config.target_str,
            local_proxy: config.local_proxy,
            lists: Mutex::default(),
        }
    }

    /// Raw newline-separated specification
    pub fn target_str(&self) -> &str {
        &self.target_str
    }

    pub fn local_proxy(&self) -> bool {
        self.local_proxy
    }

    fn lock(&self) -> MutexGuard<'_, TargetLists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TargetLists {
        self.lock().clone()
    }

    /// Whether the raw specification mentions `target`
    pub fn mentions(&self, target: &str) -> bool {
        self.target_str.contains(target)
    }

    fn split_target_str(&self) -> Vec<String> {
        self.target_str
            .split('\n')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Take `target` out of rotation.
    pub fn mark_down(&self, target: &str) {
        let mut lists = self.lock();
        let needs_split = match &lists.live {
            None => true,
            Some(live) => live.is_empty() && lists.removed.is_empty(),
        };
        if needs_split {
            lists.live = Some(self.split_target_str());
        }
        if let Some(live) = lists.live.as_mut() {
            live.retain(|t| t != target);
        }
        if !lists.removed.iter().any(|t| t == target) {
            lists.removed.push(target.to_string());
        }
    }

    /// Put `target` back into rotation if it was removed.
    ///
    /// Returns `true` when the lists changed.
    pub fn mark_up(&self, target: &str) -> bool {
        let mut lists = self.lock();
        let was_removed = lists.removed.iter().any(|t| t == target);
        let is_live = lists
            .live
            .as_ref()
            .is_some_and(|live| live.iter().any(|t| t == target));
        if !was_removed || is_live {
            return false;
        }
        lists
            .live
            .get_or_insert_with(Vec::new)
            .push(target.to_string());
        lists.removed.retain(|t| t != target);
        true
    }

    /// Targets currently eligible for traffic
    pub fn live_targets(&self) -> Vec<String> {
        match &self.lock().live {
            Some(live) => live.clone(),
            None => self.split_target_str(),
        }
    }
}

/// Port-forwarding task
#[derive(Debug)]
pub struct Tunnel {
    pub id: TaskId,
    pub port: u16,
    pub server_ip: String,
    pub mode: TunnelMode,
    pub status: bool,
    pub client_id: ClientId,
    pub remark: String,
    pub password: String,
    pub local_path: String,
    pub strip_pre: String,
    pub target: Target,
    pub flow: Flow,
}

/// HTTP(S) routing rule
#[derive(Debug)]
pub struct Host {
    pub id: i32,
    pub client_id: ClientId,
    pub host: String,
    pub location: String,
    pub scheme: String,
    pub remark: String,
    pub host_change: String,
    pub header_change: String,
    pub cert_file_path: String,
    pub key_file_path: String,
    pub target: Target,
    pub flow: Flow,
}

impl Host {
    /// Build a host for `client_id`; an empty location becomes `/`.
    pub fn from_config(config: HostConfig, client_id: ClientId) -> Self {
        let location = if config.location.is_empty() {
            "/".to_string()
        } else {
            config.location
        };
        Self {
            id: 0,
            client_id,
            host: config.host,
            location,
            scheme: config.scheme,
            remark: config.remark,
            host_change: config.host_change,
            header_change: config.header_change,
            cert_file_path: config.cert_file_path,
            key_file_path: config.key_file_path,
            target: Target::from_config(config.target),
            flow: Flow::default(),
        }
    }

    /// Two hosts compete for the same requests
    pub fn conflicts_with(&self, other: &Host) -> bool {
        self.host == other.host
            && self.location == other.location
            && (self.scheme == other.scheme || self.scheme == "all" || other.scheme == "all")
    }
}
