//! Client sessions and the registry that owns them
//!
//! A session collects up to three independently established handles: the
//! signal connection, the tunnel multiplexer and the file multiplexer. Each
//! handle arrives on its own connection and is merged into whatever session
//! already exists for the client id.

use crate::stream::Multiplexer;
use crate::transport::SignalHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ferrobridge_common::ClientId;
use std::sync::Arc;

/// Consecutive failed checks after which a handle-less session is dead
pub const MAX_CHECK_RETRIES: u32 = 3;

#[derive(Debug, Default)]
pub struct ClientSession {
    signal: Option<SignalHandle>,
    tunnel: Option<Multiplexer>,
    file: Option<Multiplexer>,
    version: String,
    retries: u32,
}

impl ClientSession {
    /// Placeholder registered before any handle arrives
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_signal(signal: SignalHandle, version: impl Into<String>) -> Self {
        Self {
            signal: Some(signal),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_tunnel(tunnel: Multiplexer, version: impl Into<String>) -> Self {
        Self {
            tunnel: Some(tunnel),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_file(file: Multiplexer, version: impl Into<String>) -> Self {
        Self {
            file: Some(file),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn signal(&self) -> Option<&SignalHandle> {
        self.signal.as_ref()
    }

    pub fn tunnel(&self) -> Option<&Multiplexer> {
        self.tunnel.as_ref()
    }

    pub fn file(&self) -> Option<&Multiplexer> {
        self.file.as_ref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Install a new signal handle; a previous one is told to close first.
    pub fn replace_signal(&mut self, signal: SignalHandle, version: impl Into<String>) {
        if let Some(old) = self.signal.take() {
            old.notify_close();
            old.close();
        }
        self.signal = Some(signal);
        self.version = version.into();
    }

    pub fn set_tunnel(&mut self, tunnel: Multiplexer) {
        if let Some(old) = self.tunnel.replace(tunnel) {
            old.close();
        }
    }

    pub fn set_file(&mut self, file: Multiplexer) {
        if let Some(old) = self.file.replace(file) {
            old.close();
        }
    }

    /// Liveness predicate evaluated by the periodic sweep
    ///
    /// With neither a tunnel multiplexer nor a signal handle the session is
    /// given [`MAX_CHECK_RETRIES`] chances; a closed tunnel multiplexer is
    /// dead at once.
    pub fn check(&mut self) -> bool {
        if self.tunnel.is_none() && self.signal.is_none() {
            self.retries += 1;
            return self.retries < MAX_CHECK_RETRIES;
        }
        match &self.tunnel {
            Some(tunnel) => !tunnel.is_closed(),
            None => true,
        }
    }

    /// Close every handle the session holds.
    pub fn close(&self) {
        if let Some(tunnel) = &self.tunnel {
            tunnel.close();
        }
        if let Some(signal) = &self.signal {
            signal.close();
        }
        if let Some(file) = &self.file {
            file.close();
        }
    }
}

/// Concurrent map of client id to session
///
/// The registry is the only place sessions are created, merged or removed.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ClientId, ClientSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `new` or, if a session exists, let `merge` update it in place.
    ///
    /// Returns `true` when an existing session was merged.
    pub fn upsert(
        &self,
        id: ClientId,
        new: ClientSession,
        merge: impl FnOnce(&mut ClientSession),
    ) -> bool {
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                merge(entry.get_mut());
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(new);
                false
            }
        }
    }

    /// Replace any session under `id` with `session`, closing the old one.
    pub fn set(&self, id: ClientId, session: ClientSession) {
        if let Some(old) = self.sessions.insert(id, session) {
            old.close();
        }
    }

    /// Close and remove the session under `id`.
    pub fn remove(&self, id: ClientId) -> Option<ClientSession> {
        let (_, session) = self.sessions.remove(&id)?;
        session.close();
        Some(session)
    }

    /// Remove the session only if `predicate` holds for it.
    pub fn remove_if(
        &self,
        id: ClientId,
        predicate: impl FnOnce(&ClientSession) -> bool,
    ) -> Option<ClientSession> {
        let (_, session) = self.sessions.remove_if(&id, |_, s| predicate(s))?;
        session.close();
        Some(session)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn signal(&self, id: ClientId) -> Option<SignalHandle> {
        self.sessions.get(&id).and_then(|s| s.signal.clone())
    }

    pub fn tunnel(&self, id: ClientId) -> Option<Multiplexer> {
        self.sessions.get(&id).and_then(|s| s.tunnel.clone())
    }

    pub fn file(&self, id: ClientId) -> Option<Multiplexer> {
        self.sessions.get(&id).and_then(|s| s.file.clone())
    }

    pub fn version(&self, id: ClientId) -> Option<String> {
        self.sessions.get(&id).map(|s| s.version.clone())
    }

    /// Run [`ClientSession::check`] on every session and return the dead ids.
    pub fn sweep(&self) -> Vec<ClientId> {
        let mut dead = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            if !entry.check() {
                dead.push(*entry.key());
            }
        }
        dead.sort_unstable();
        dead
    }
}
