//! Queues through which the bridge hands work to the listening subsystem
//!
//! Every queue is a zero-capacity rendezvous channel: a send completes only
//! once a consumer takes the item. A missing consumer stalls the sender; a
//! dropped consumer makes the send fail.

use crate::model::Tunnel;
use crate::transport::BridgeConn;
use dashmap::DashSet;
use ferrobridge_common::{BridgeError, ClientId, Result, TaskId};
use kanal::{bounded_async, AsyncReceiver, AsyncSender};
use std::sync::Arc;
use std::time::Duration;

/// A connection waiting to be paired with its counterpart by token
#[derive(Debug)]
pub struct SecretLink {
    pub token: Vec<u8>,
    pub conn: BridgeConn,
}

/// Consumer ends of the handoff queues
#[derive(Debug)]
pub struct BridgeHandoffs {
    /// Tunnels the listening subsystem should start serving
    pub open_task: AsyncReceiver<Arc<Tunnel>>,
    /// Tunnels the listening subsystem should stop serving
    pub close_task: AsyncReceiver<Arc<Tunnel>>,
    /// Persisted clients whose session was torn down
    pub close_client: AsyncReceiver<ClientId>,
    /// Secret connections awaiting a match
    pub secret: AsyncReceiver<SecretLink>,
}

#[derive(Debug, Clone)]
pub(crate) struct HandoffSenders {
    open_task: AsyncSender<Arc<Tunnel>>,
    close_task: AsyncSender<Arc<Tunnel>>,
    close_client: AsyncSender<ClientId>,
    secret: AsyncSender<SecretLink>,
    secret_timeout: Option<Duration>,
}

pub(crate) fn channels(secret_timeout: Option<Duration>) -> (HandoffSenders, BridgeHandoffs) {
    let (open_task_tx, open_task_rx) = bounded_async(0);
    let (close_task_tx, close_task_rx) = bounded_async(0);
    let (close_client_tx, close_client_rx) = bounded_async(0);
    let (secret_tx, secret_rx) = bounded_async(0);
    (
        HandoffSenders {
            open_task: open_task_tx,
            close_task: close_task_tx,
            close_client: close_client_tx,
            secret: secret_tx,
            secret_timeout,
        },
        BridgeHandoffs {
            open_task: open_task_rx,
            close_task: close_task_rx,
            close_client: close_client_rx,
            secret: secret_rx,
        },
    )
}

fn closed(queue: &str) -> BridgeError {
    BridgeError::ChannelClosed(format!("{queue} queue has no consumer"))
}

impl HandoffSenders {
    pub(crate) async fn open_task(&self, tunnel: Arc<Tunnel>) -> Result<()> {
        self.open_task
            .send(tunnel)
            .await
            .map_err(|_| closed("open-task"))
    }

    pub(crate) async fn close_task(&self, tunnel: Arc<Tunnel>) -> Result<()> {
        self.close_task
            .send(tunnel)
            .await
            .map_err(|_| closed("close-task"))
    }

    pub(crate) async fn close_client(&self, id: ClientId) -> Result<()> {
        self.close_client
            .send(id)
            .await
            .map_err(|_| closed("close-client"))
    }

    /// Blocks until the matcher takes the link, or the configured timeout ends.
    pub(crate) async fn secret(&self, link: SecretLink) -> Result<()> {
        let send = self.secret.send(link);
        match self.secret_timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| BridgeError::Timeout("no match for secret token".into()))?
                .map_err(|_| closed("secret")),
            None => send.await.map_err(|_| closed("secret")),
        }
    }
}

/// Task ids the listening subsystem is currently serving
#[derive(Debug, Clone, Default)]
pub struct RunningTasks {
    ids: Arc<DashSet<TaskId>>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TaskId) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&self, id: TaskId) -> bool {
        self.ids.remove(&id).is_some()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
