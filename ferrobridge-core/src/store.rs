//! Client, host and tunnel storage consumed by the bridge
//!
//! The bridge only needs lookups, inserts and id allocation. [`MemoryStore`]
//! keeps everything in concurrent maps and is what the server binary uses.

use crate::auth::{self, md5_hex};
use crate::model::{Client, Host, Tunnel};
use dashmap::DashMap;
use ferrobridge_common::{BridgeError, ClientId, Result, TaskId, PUBLIC_CLIENT_ID};
use ferrobridge_protocol::TunnelMode;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Persistence operations the bridge relies on
pub trait Store: Send + Sync {
    /// Resolve the wire verify key (hex MD5) of an enabled client and record
    /// the address it connected from.
    fn client_id_by_verify_key_and_addr(&self, presented: &[u8], addr: SocketAddr)
        -> Result<ClientId>;

    fn client_id_by_verify_key(&self, presented: &[u8]) -> Result<ClientId>;

    fn client(&self, id: ClientId) -> Option<Client>;

    fn is_public_client(&self, id: ClientId) -> bool;

    /// Persist a new client under a fresh id; issues a verify key if none was given.
    fn new_client(&self, client: Client) -> Result<Client>;

    /// Another client already serves this host and location
    fn host_exists(&self, host: &Host) -> bool;

    fn client_has_host(&self, client_id: ClientId, host: &Host) -> bool;

    fn new_host(&self, host: Host) -> Result<Arc<Host>>;

    fn next_task_id(&self) -> TaskId;

    fn client_has_tunnel(&self, client_id: ClientId, tunnel: &Tunnel) -> bool;

    fn new_tunnel(&self, tunnel: Tunnel) -> Result<Arc<Tunnel>>;

    fn tunnel(&self, id: TaskId) -> Option<Arc<Tunnel>>;

    fn tunnels_of(&self, client_id: ClientId) -> Vec<Arc<Tunnel>>;

    fn hosts_of(&self, client_id: ClientId) -> Vec<Arc<Host>>;

    /// Resolve a secret/P2P tunnel from the hex MD5 of its password
    fn tunnel_by_password_hash(&self, hash: &[u8]) -> Option<Arc<Tunnel>>;
}

/// In-memory [`Store`]
#[derive(Debug)]
pub struct MemoryStore {
    clients: DashMap<ClientId, Client>,
    client_addrs: DashMap<ClientId, SocketAddr>,
    tunnels: DashMap<TaskId, Arc<Tunnel>>,
    hosts: DashMap<i32, Arc<Host>>,
    /// Held across each uniqueness check and the insert it guards
    record_writes: Mutex<()>,
    next_client_id: AtomicI32,
    next_task_id: AtomicI32,
    next_host_id: AtomicI32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            client_addrs: DashMap::new(),
            tunnels: DashMap::new(),
            hosts: DashMap::new(),
            record_writes: Mutex::new(()),
            next_client_id: AtomicI32::new(PUBLIC_CLIENT_ID + 1),
            next_task_id: AtomicI32::new(1),
            next_host_id: AtomicI32::new(1),
        }
    }

    /// Register the shared public client under `verify_key`.
    #[must_use]
    pub fn with_public_key(self, verify_key: impl Into<String>) -> Self {
        self.clients.insert(
            PUBLIC_CLIENT_ID,
            Client {
                id: PUBLIC_CLIENT_ID,
                verify_key: verify_key.into(),
                remark: "public".into(),
                status: true,
                config_conn_allow: true,
                ..Client::default()
            },
        );
        self
    }

    /// Load client records from a JSON array, keeping their ids.
    pub fn seed_clients(&self, json: &[u8]) -> Result<usize> {
        let clients: Vec<Client> = serde_json::from_slice(json)?;
        let count = clients.len();
        for client in clients {
            if client.id == PUBLIC_CLIENT_ID {
                return Err(BridgeError::Store(format!(
                    "client id {PUBLIC_CLIENT_ID} is reserved for the public client"
                )));
            }
            self.next_client_id.fetch_max(client.id + 1, Ordering::Relaxed);
            self.clients.insert(client.id, client);
        }
        Ok(count)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.record_writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address a client last authenticated from
    pub fn client_addr(&self, id: ClientId) -> Option<SocketAddr> {
        self.client_addrs.get(&id).map(|r| *r)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }
}

impl Store for MemoryStore {
    fn client_id_by_verify_key_and_addr(
        &self,
        presented: &[u8],
        addr: SocketAddr,
    ) -> Result<ClientId> {
        let id = self.client_id_by_verify_key(presented)?;
        self.client_addrs.insert(id, addr);
        Ok(id)
    }

    fn client_id_by_verify_key(&self, presented: &[u8]) -> Result<ClientId> {
        self.clients
            .iter()
            .find(|c| c.status && auth::verify_key_matches(&c.verify_key, presented))
            .map(|c| c.id)
            .ok_or_else(|| BridgeError::Verify("not found the client".into()))
    }

    fn client(&self, id: ClientId) -> Option<Client> {
        self.clients.get(&id).map(|r| r.clone())
    }

    fn is_public_client(&self, id: ClientId) -> bool {
        id == PUBLIC_CLIENT_ID && self.clients.contains_key(&id)
    }

    fn new_client(&self, mut client: Client) -> Result<Client> {
        if client.verify_key.is_empty() {
            client.verify_key = auth::generate_verify_key();
        }
        let digest = md5_hex(&client.verify_key);
        if self
            .clients
            .iter()
            .any(|c| auth::verify_key_matches(&c.verify_key, digest.as_bytes()))
        {
            return Err(BridgeError::Store("verify key is already in use".into()));
        }
        client.id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        client.status = true;
        self.clients.insert(client.id, client.clone());
        Ok(client)
    }

    fn host_exists(&self, host: &Host) -> bool {
        self.hosts
            .iter()
            .any(|h| h.id != host.id && h.conflicts_with(host))
    }

    fn client_has_host(&self, client_id: ClientId, host: &Host) -> bool {
        self.hosts.iter().any(|h| {
            h.client_id == client_id && h.host == host.host && h.location == host.location
        })
    }

    fn new_host(&self, mut host: Host) -> Result<Arc<Host>> {
        let _guard = self.lock_writes();
        if self.host_exists(&host) {
            return Err(BridgeError::Store(format!("host {} already exists", host.host)));
        }
        host.id = self.next_host_id.fetch_add(1, Ordering::Relaxed);
        let host = Arc::new(host);
        self.hosts.insert(host.id, Arc::clone(&host));
        Ok(host)
    }

    fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    fn client_has_tunnel(&self, client_id: ClientId, tunnel: &Tunnel) -> bool {
        tunnel.port != 0
            && self
                .tunnels
                .iter()
                .any(|t| t.client_id == client_id && t.port == tunnel.port)
    }

    fn new_tunnel(&self, tunnel: Tunnel) -> Result<Arc<Tunnel>> {
        let _guard = self.lock_writes();
        if matches!(tunnel.mode, TunnelMode::Secret | TunnelMode::P2p)
            && self.tunnels.iter().any(|t| {
                matches!(t.mode, TunnelMode::Secret | TunnelMode::P2p)
                    && t.password == tunnel.password
            })
        {
            return Err(BridgeError::Store(format!(
                "secret mode keys {} must be unique",
                tunnel.password
            )));
        }
        if self.tunnels.contains_key(&tunnel.id) {
            return Err(BridgeError::Store(format!("task id {} already exists", tunnel.id)));
        }
        let tunnel = Arc::new(tunnel);
        self.tunnels.insert(tunnel.id, Arc::clone(&tunnel));
        Ok(tunnel)
    }

    fn tunnel(&self, id: TaskId) -> Option<Arc<Tunnel>> {
        self.tunnels.get(&id).map(|r| r.value().clone())
    }

    fn tunnels_of(&self, client_id: ClientId) -> Vec<Arc<Tunnel>> {
        let mut tunnels: Vec<_> = self
            .tunnels
            .iter()
            .filter(|t| t.client_id == client_id)
            .map(|t| t.value().clone())
            .collect();
        tunnels.sort_by_key(|t| t.id);
        tunnels
    }

    fn hosts_of(&self, client_id: ClientId) -> Vec<Arc<Host>> {
        let mut hosts: Vec<_> = self
            .hosts
            .iter()
            .filter(|h| h.client_id == client_id)
            .map(|h| h.value().clone())
            .collect();
        hosts.sort_by_key(|h| h.id);
        hosts
    }

    fn tunnel_by_password_hash(&self, hash: &[u8]) -> Option<Arc<Tunnel>> {
        self.tunnels
            .iter()
            .find(|t| !t.password.is_empty() && auth::verify_key_matches(&t.password, hash))
            .map(|t| t.value().clone())
    }
}
