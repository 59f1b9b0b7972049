//! The bridge: accepts client connections, runs the handshake and routes
//! each connection to its work-type handler
//!
//! All shared state (session registry, registered IPs, store, handoff
//! queues) lives behind one cheaply clonable [`Bridge`] handle that is passed
//! to every connection task.

pub mod config;
mod dispatch;
pub mod handoff;
pub mod handshake;
pub mod health;
mod secret;
mod work;

pub use handoff::{BridgeHandoffs, RunningTasks, SecretLink};
pub use handshake::Handshake;
pub use health::apply_report;

use crate::ip_registry::RegisteredIps;
use crate::model::Tunnel;
use crate::ports::PortPolicy;
use crate::session::SessionRegistry;
use crate::store::Store;
use crate::transport::{BoxedStream, BridgeConn, ControlListener, SignalHandle};
use ferrobridge_common::{BridgeConfig, ClientId, Result};
use handoff::HandoffSenders;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    store: Arc<dyn Store>,
    sessions: SessionRegistry,
    registered_ips: RegisteredIps,
    running_tasks: RunningTasks,
    port_policy: PortPolicy,
    handoff: HandoffSenders,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("bind_addr", &self.inner.config.bind_addr)
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Bridge {
    /// Build a bridge over `store`.
    ///
    /// The returned [`BridgeHandoffs`] must be consumed by the listening
    /// subsystem; sends on them block until taken.
    pub fn new(config: BridgeConfig, store: Arc<dyn Store>) -> Result<(Self, BridgeHandoffs)> {
        config.validate()?;
        let (handoff, handoffs) = handoff::channels(config.secret_match_timeout);
        let port_policy = PortPolicy::new(config.allowed_ports.clone());
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                config,
                store,
                sessions: SessionRegistry::new(),
                registered_ips: RegisteredIps::new(),
                running_tasks: RunningTasks::new(),
                port_policy,
                handoff,
            }),
        };
        Ok((bridge, handoffs))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn registered_ips(&self) -> &RegisteredIps {
        &self.inner.registered_ips
    }

    pub fn running_tasks(&self) -> &RunningTasks {
        &self.inner.running_tasks
    }

    pub fn port_policy(&self) -> &PortPolicy {
        &self.inner.port_policy
    }

    pub(crate) fn handoff(&self) -> &HandoffSenders {
        &self.inner.handoff
    }

    /// Accept connections forever, with the liveness sweep running alongside.
    pub async fn run<L: ControlListener>(&self, listener: L) -> Result<()> {
        info!(
            "bridge listening on {}, version {}",
            listener.local_addr()?,
            self.config().version
        );
        let _sweep = AbortOnDrop(self.spawn_liveness_sweep());

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        bridge.serve_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Handshake one accepted connection and hand it to its work type.
    pub async fn serve_connection(&self, stream: BoxedStream, addr: SocketAddr) {
        let mut conn = BridgeConn::new(stream, addr, self.config().max_message_len);
        match handshake::perform(&mut conn, self.config(), self.store().as_ref()).await {
            Ok(hs) => self.dispatch_work(conn, hs).await,
            Err(e) => {
                warn!(addr = %addr, "handshake failed: {}", e);
                conn.shutdown().await;
            }
        }
    }

    /// Periodically evaluate every session's liveness and log the dead ones.
    ///
    /// Removal is left to the connection tasks; the sweep never evicts.
    pub fn spawn_liveness_sweep(&self) -> JoinHandle<()> {
        let sessions = self.sessions().clone();
        let period = self.config().check_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                for id in sessions.sweep() {
                    info!(client_id = id, "client closed");
                }
            }
        })
    }

    /// Close and remove a client's session, then report the closure.
    pub async fn delete_client(&self, id: ClientId) {
        if self.sessions().remove(id).is_some() {
            self.notify_client_closed(id).await;
        }
    }

    /// Delete the session only if `signal` is still its signal connection.
    pub(crate) async fn delete_client_with_signal(&self, id: ClientId, signal: &SignalHandle) {
        let removed = self.sessions().remove_if(id, |session| {
            session
                .signal()
                .is_some_and(|current| current.same_connection(signal))
        });
        if removed.is_some() {
            self.notify_client_closed(id).await;
        } else {
            signal.close();
        }
    }

    async fn notify_client_closed(&self, id: ClientId) {
        if self.store().is_public_client(id) {
            return;
        }
        if let Some(client) = self.store().client(id) {
            if let Err(e) = self.handoff().close_client(client.id).await {
                debug!(client_id = id, "close-client handoff failed: {}", e);
            }
        }
    }

    /// Ask the listening subsystem to stop serving `tunnel`.
    pub async fn close_task(&self, tunnel: Arc<Tunnel>) -> Result<()> {
        self.handoff().close_task(tunnel).await
    }

    /// What the `stus` config request reports for `client_id`
    pub fn status_report(&self, client_id: ClientId) -> String {
        config::status_report(self, client_id)
    }
}
