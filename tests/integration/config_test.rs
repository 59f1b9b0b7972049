//! Dynamic config sub-protocol

use ferrobridge_core::auth::md5_hex;
use ferrobridge_core::model::Client;
use ferrobridge_core::Store;
use ferrobridge_protocol::{ConfigFlag, WorkType};
use ferrobridge_tests::{free_port, wait_until, TestBridge, CLIENT_KEY, OTHER_KEY, PUBLIC_KEY};
use serde_json::json;
use std::time::Duration;

/// Mark every opened task as running, like the listening subsystem does.
fn consume_open_tasks(bridge: &mut TestBridge) {
    let handoffs = bridge.handoffs();
    let running = bridge.bridge.running_tasks().clone();
    tokio::spawn(async move {
        while let Ok(tunnel) = handoffs.open_task.recv().await {
            running.insert(tunnel.id);
        }
    });
}

#[tokio::test]
async fn test_gate_reports_public_flag() {
    let bridge = TestBridge::start().await;
    let mut private = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    assert!(!private.read_bool().await);
    let mut public = bridge.connect(PUBLIC_KEY, WorkType::Config).await;
    assert!(public.read_bool().await);
}

#[tokio::test]
async fn test_gate_refuses_client_without_permission() {
    let bridge = TestBridge::start().await;
    bridge
        .store
        .new_client(Client {
            verify_key: "locked".into(),
            config_conn_allow: false,
            ..Client::default()
        })
        .unwrap();

    let mut conn = bridge.connect("locked", WorkType::Config).await;
    assert!(conn.closed_by_peer().await);
}

#[tokio::test]
async fn test_task_fans_out_over_ports() {
    let mut bridge = TestBridge::start().await;
    consume_open_tasks(&mut bridge);
    let (p1, p2) = (free_port(), free_port());

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    conn.read_bool().await;
    conn.write(ConfigFlag::NewTask.tag()).await;
    conn.write_json(&json!({
        "Mode": "tcp",
        "Ports": format!("{p1},{p2}"),
        "Target": { "TargetStr": "9001,9002" },
        "Remark": "web",
    }))
    .await;
    assert!(conn.read_bool().await);
    assert!(conn.read_bool().await);

    let mut tunnels = bridge.store.tunnels_of(1);
    tunnels.sort_by_key(|t| t.id);
    assert_eq!(tunnels.len(), 2);
    assert_eq!(tunnels[0].port, p1);
    assert_eq!(tunnels[0].target.target_str(), "9001");
    assert_eq!(tunnels[1].port, p2);
    assert_eq!(tunnels[1].target.target_str(), "9002");
}

#[tokio::test]
async fn test_task_port_target_mismatch_fails() {
    let mut bridge = TestBridge::start().await;
    consume_open_tasks(&mut bridge);
    let (p1, p2) = (free_port(), free_port());

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    conn.read_bool().await;
    conn.write(ConfigFlag::NewTask.tag()).await;
    conn.write_json(&json!({
        "Mode": "tcp",
        "Ports": format!("{p1},{p2}"),
        "Target": { "TargetStr": "9001" },
    }))
    .await;
    assert!(!conn.read_bool().await);
    assert!(conn.closed_by_peer().await);
    assert_eq!(bridge.store.tunnel_count(), 0);
}

#[tokio::test]
async fn test_status_lists_running_tasks() {
    let mut bridge = TestBridge::start().await;
    consume_open_tasks(&mut bridge);
    let port = free_port();

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    conn.read_bool().await;
    conn.write(ConfigFlag::NewTask.tag()).await;
    conn.write_json(&json!({
        "Mode": "tcp",
        "Ports": port.to_string(),
        "Target": { "TargetStr": "127.0.0.1:22" },
        "Remark": "ssh",
    }))
    .await;
    assert!(conn.read_bool().await);

    let running = bridge.bridge.running_tasks().clone();
    assert!(ferrobridge_tests::wait_until(|| running.len() == 1).await);

    conn.write(ConfigFlag::Status.tag()).await;
    conn.write(md5_hex(CLIENT_KEY).as_bytes()).await;
    assert_eq!(conn.read_len().await, b"ssh*#*");
}

#[tokio::test]
async fn test_new_client_gets_a_working_key() {
    let bridge = TestBridge::start().await;
    let before = bridge.store.client_count();

    let mut conn = bridge.connect(PUBLIC_KEY, WorkType::Config).await;
    assert!(conn.read_bool().await);
    conn.write(ConfigFlag::NewConfig.tag()).await;
    conn.write_json(&json!({ "Remark": "fresh" })).await;
    assert!(conn.read_bool().await);
    let key = String::from_utf8(conn.read_exact(16).await).unwrap();
    assert_eq!(bridge.store.client_count(), before + 1);

    let id = bridge.store.client_id_by_verify_key(md5_hex(&key).as_bytes()).unwrap();
    assert!(bridge.bridge.sessions().contains(id));

    let mut register = bridge.connect(&key, WorkType::Register).await;
    register.write(&1i32.to_le_bytes()).await;
    assert!(register.closed_by_peer().await);
}

#[tokio::test]
async fn test_host_owned_by_another_client_fails() {
    let bridge = TestBridge::start().await;
    let host = json!({ "Host": "a.example.com", "Target": { "TargetStr": "127.0.0.1:80" } });

    let mut owner = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    owner.read_bool().await;
    owner.write(ConfigFlag::NewHost.tag()).await;
    owner.write_json(&host).await;
    assert!(owner.read_bool().await);

    let mut other = bridge.connect(OTHER_KEY, WorkType::Config).await;
    other.read_bool().await;
    other.write(ConfigFlag::NewHost.tag()).await;
    other.write_json(&host).await;
    assert!(!other.read_bool().await);
    assert!(other.closed_by_peer().await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.store.hosts_of(1).len(), 1);
    assert!(bridge.store.hosts_of(2).is_empty());
}

#[tokio::test]
async fn test_failed_request_closes_the_client_session() {
    let mut bridge = TestBridge::start().await;
    let handoffs = bridge.handoffs();
    let (p1, p2) = (free_port(), free_port());

    let _main = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    let sessions = bridge.bridge.sessions().clone();
    assert!(wait_until(|| sessions.contains(1)).await);

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    conn.read_bool().await;
    conn.write(ConfigFlag::NewTask.tag()).await;
    conn.write_json(&json!({
        "Mode": "tcp",
        "Ports": format!("{p1},{p2}"),
        "Target": { "TargetStr": "9001" },
    }))
    .await;
    assert!(!conn.read_bool().await);

    let closed = tokio::time::timeout(Duration::from_secs(5), handoffs.close_client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed, 1);
    assert!(!sessions.contains(1));
    assert!(conn.closed_by_peer().await);
}

#[tokio::test]
async fn test_host_without_name_fails() {
    let bridge = TestBridge::start().await;

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Config).await;
    conn.read_bool().await;
    conn.write(ConfigFlag::NewHost.tag()).await;
    conn.write_json(&json!({ "Host": "", "Target": { "TargetStr": "127.0.0.1:80" } }))
        .await;
    assert!(!conn.read_bool().await);
    assert!(conn.closed_by_peer().await);
    assert!(bridge.store.hosts_of(1).is_empty());
}
