//! Default consumers of the bridge handoff queues
//!
//! A deployment with its own listening subsystem replaces these; the
//! defaults only keep the bridge's running-task view accurate and serve
//! secret connections through their owning client.

use ferrobridge_core::{Bridge, BridgeHandoffs};
use tracing::{info, warn};

pub fn spawn(bridge: &Bridge, handoffs: BridgeHandoffs) {
    let BridgeHandoffs {
        open_task,
        close_task,
        close_client,
        secret,
    } = handoffs;

    let running = bridge.running_tasks().clone();
    tokio::spawn(async move {
        while let Ok(tunnel) = open_task.recv().await {
            info!(task_id = tunnel.id, port = tunnel.port, mode = %tunnel.mode, "task opened");
            running.insert(tunnel.id);
        }
    });

    let running = bridge.running_tasks().clone();
    tokio::spawn(async move {
        while let Ok(tunnel) = close_task.recv().await {
            info!(task_id = tunnel.id, "task closed");
            running.remove(tunnel.id);
        }
    });

    tokio::spawn(async move {
        while let Ok(client_id) = close_client.recv().await {
            info!(client_id, "client session closed");
        }
    });

    let bridge = bridge.clone();
    tokio::spawn(async move {
        while let Ok(link) = secret.recv().await {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                if let Err(e) = bridge.serve_secret(link).await {
                    warn!("secret link error: {}", e);
                }
            });
        }
    });
}
