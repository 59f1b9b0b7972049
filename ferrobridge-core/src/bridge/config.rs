//! Dynamic config sub-protocol
//!
//! After the `conf` work flag the bridge writes whether the client is the
//! public client, then serves `stus`, `conf`, `host` and `task` requests
//! until the connection ends or a request fails. A failed request is
//! answered with the add-fail marker and ends the loop.

use super::Bridge;
use crate::model::{Client, Flow, Host, Target, Tunnel};
use crate::ports::parse_ports;
use crate::session::ClientSession;
use crate::transport::conn::read_error;
use crate::transport::BridgeConn;
use ferrobridge_common::{BridgeError, ClientId, Result};
use ferrobridge_protocol::constants::{CONN_DATA_SEQ, VERIFY_KEY_LEN};
use ferrobridge_protocol::validation::{validate_host, validate_task};
use ferrobridge_protocol::{ClientConfig, ConfigFlag, HostConfig, TaskConfig, TunnelMode};
use tracing::{debug, info, warn};

/// Outcome of one request inside the loop
enum Step {
    Continue,
    Fail,
}

/// Serve the sub-protocol for `client_id`; always closes `conn`.
pub(crate) async fn serve(bridge: &Bridge, mut conn: BridgeConn, client_id: ClientId) {
    let store = bridge.store();
    let is_public = store.is_public_client(client_id);
    let client = match store.client(client_id) {
        Some(client) if is_public || client.config_conn_allow => client,
        _ => {
            warn!(client_id, addr = %conn.remote_addr(), "config connection not allowed");
            conn.shutdown().await;
            return;
        }
    };

    if conn.write_bool(is_public).await.is_err() {
        conn.shutdown().await;
        return;
    }

    let mut client = client;
    let failed = loop {
        let flag = match conn.read_flag().await {
            Ok(flag) => flag,
            Err(e) => {
                debug!(client_id, "config connection ended: {}", e);
                break false;
            }
        };
        let step = match ConfigFlag::from_flag(flag) {
            Some(ConfigFlag::Status) => handle_status(bridge, &mut conn).await,
            Some(ConfigFlag::NewConfig) => match handle_new_config(bridge, &mut conn).await {
                Ok(created) => {
                    client = created;
                    Step::Continue
                }
                Err(e) => {
                    warn!(client_id = client.id, "new client rejected: {}", e);
                    Step::Fail
                }
            },
            Some(ConfigFlag::NewHost) => handle_new_host(bridge, &mut conn, &client).await,
            Some(ConfigFlag::NewTask) => handle_new_task(bridge, &mut conn, &client).await,
            None => {
                debug!(client_id, %flag, "unknown config flag ignored");
                Step::Continue
            }
        };
        if let Step::Fail = step {
            break true;
        }
    };

    if failed {
        bridge.delete_client(client.id).await;
    }
    conn.shutdown().await;
}

async fn write_add_fail(conn: &mut BridgeConn) -> Step {
    let _ = conn.write_bool(false).await;
    Step::Fail
}

async fn handle_status(bridge: &Bridge, conn: &mut BridgeConn) -> Step {
    let presented = match conn.read_bytes(VERIFY_KEY_LEN).await {
        Ok(presented) => presented,
        Err(e) => {
            debug!("status request error: {}", read_error("verify key", e));
            return Step::Fail;
        }
    };
    let Ok(id) = bridge.store().client_id_by_verify_key(&presented) else {
        return Step::Fail;
    };

    let status = status_report(bridge, id);
    if conn.write_len_content(status.as_bytes()).await.is_err() {
        return Step::Fail;
    }
    Step::Continue
}

/// Remarks of every host and running tunnel of `client_id`, each followed by the delimiter
pub(crate) fn status_report(bridge: &Bridge, client_id: ClientId) -> String {
    let store = bridge.store();
    let running = bridge.running_tasks();
    let mut report = String::new();
    for host in store.hosts_of(client_id) {
        report.push_str(&host.remark);
        report.push_str(CONN_DATA_SEQ);
    }
    for tunnel in store.tunnels_of(client_id) {
        if running.contains(tunnel.id) {
            report.push_str(&tunnel.remark);
            report.push_str(CONN_DATA_SEQ);
        }
    }
    report
}

async fn handle_new_config(bridge: &Bridge, conn: &mut BridgeConn) -> Result<Client> {
    let config: ClientConfig = match conn.read_json().await {
        Ok(config) => config,
        Err(e) => {
            write_add_fail(conn).await;
            return Err(e);
        }
    };
    let client = match bridge.store().new_client(Client::from_config(config)) {
        Ok(client) => client,
        Err(e) => {
            write_add_fail(conn).await;
            return Err(e);
        }
    };

    conn.write_bool(true).await?;
    conn.write_all(client.verify_key.as_bytes()).await?;
    bridge.sessions().set(client.id, ClientSession::empty());
    info!(client_id = client.id, "new client registered over config connection");
    Ok(client)
}

async fn handle_new_host(bridge: &Bridge, conn: &mut BridgeConn, client: &Client) -> Step {
    let config: HostConfig = match conn.read_json().await {
        Ok(config) => config,
        Err(e) => {
            warn!(client_id = client.id, "bad host record: {}", e);
            return write_add_fail(conn).await;
        }
    };
    if let Err(e) = validate_host(&config) {
        warn!(client_id = client.id, "host rejected: {}", e);
        return write_add_fail(conn).await;
    }
    let store = bridge.store();
    let host = Host::from_config(config, client.id);

    if !store.client_has_host(client.id, &host) {
        if store.host_exists(&host) {
            warn!(client_id = client.id, host = %host.host, "host already owned by another client");
            return write_add_fail(conn).await;
        }
        if let Err(e) = store.new_host(host) {
            warn!(client_id = client.id, "add host error: {}", e);
            return write_add_fail(conn).await;
        }
    }
    match conn.write_bool(true).await {
        Ok(()) => Step::Continue,
        Err(_) => Step::Fail,
    }
}

/// Expand a task request into the tunnels it describes.
///
/// Multi-port TCP/UDP requests need one target port per server port;
/// secret and P2P requests never bind and get the single port `0`.
pub(crate) fn expand_task(
    task: &TaskConfig,
    client_id: ClientId,
    mut next_id: impl FnMut() -> i32,
) -> Result<Vec<Tunnel>> {
    let mut ports = parse_ports(&task.ports);
    let targets = parse_ports(&task.target.target_str);

    if !task.mode.binds_port() {
        ports = vec![0];
    } else if ports.len() > 1
        && matches!(task.mode, TunnelMode::Tcp | TunnelMode::Udp)
        && ports.len() != targets.len()
    {
        return Err(BridgeError::Protocol(format!(
            "{} ports but {} targets",
            ports.len(),
            targets.len()
        )));
    }
    if ports.is_empty() {
        return Err(BridgeError::Protocol("no ports requested".into()));
    }

    let fan_out = ports.len() > 1;
    let tunnels = ports
        .iter()
        .enumerate()
        .map(|(i, &port)| {
            let (remark, target) = if fan_out {
                let target_port = targets.get(i).copied().unwrap_or(port);
                let target_str = if task.target_addr.is_empty() {
                    target_port.to_string()
                } else {
                    format!("{}:{}", task.target_addr, target_port)
                };
                (format!("{}_{}", task.remark, port), Target::new(target_str))
            } else {
                (task.remark.clone(), Target::from_config(task.target.clone()))
            };
            Tunnel {
                id: next_id(),
                port,
                server_ip: task.server_ip.clone(),
                mode: task.mode,
                status: true,
                client_id,
                remark,
                password: task.password.clone(),
                local_path: task.local_path.clone(),
                strip_pre: task.strip_pre.clone(),
                target,
                flow: Flow::default(),
            }
        })
        .collect();
    Ok(tunnels)
}

async fn handle_new_task(bridge: &Bridge, conn: &mut BridgeConn, client: &Client) -> Step {
    let task: TaskConfig = match conn.read_json().await {
        Ok(task) => task,
        Err(e) => {
            warn!(client_id = client.id, "bad task record: {}", e);
            return write_add_fail(conn).await;
        }
    };
    if let Err(e) = validate_task(&task) {
        warn!(client_id = client.id, "task rejected: {}", e);
        return write_add_fail(conn).await;
    }
    let store = bridge.store();
    let tunnels = match expand_task(&task, client.id, || store.next_task_id()) {
        Ok(tunnels) => tunnels,
        Err(e) => {
            warn!(client_id = client.id, "add task error: {}", e);
            return write_add_fail(conn).await;
        }
    };

    for tunnel in tunnels {
        if !store.client_has_tunnel(client.id, &tunnel) {
            let (mode, port) = (tunnel.mode, tunnel.port);
            let tunnel = match store.new_tunnel(tunnel) {
                Ok(tunnel) => tunnel,
                Err(e) => {
                    warn!(client_id = client.id, "Add task error, {}", e);
                    return write_add_fail(conn).await;
                }
            };
            if mode.binds_port() && !bridge.port_policy().is_available(mode, port) {
                warn!(client_id = client.id, port, "task port unavailable");
                return write_add_fail(conn).await;
            }
            if let Err(e) = bridge.handoff().open_task(tunnel).await {
                warn!(client_id = client.id, "open task error: {}", e);
                return write_add_fail(conn).await;
            }
        }
        if conn.write_bool(true).await.is_err() {
            return Step::Fail;
        }
    }
    Step::Continue
}
