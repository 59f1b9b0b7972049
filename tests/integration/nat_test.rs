//! NAT traversal coordination: P2P rendezvous and secret handoff

use ferrobridge_common::BridgeConfig;
use ferrobridge_core::auth::md5_hex;
use ferrobridge_core::model::{Flow, Target, Tunnel};
use ferrobridge_core::{Multiplexer, Store};
use ferrobridge_protocol::constants::NEW_UDP_CONN;
use ferrobridge_protocol::{Link, TunnelMode, WorkType};
use ferrobridge_tests::{wait_until, RawClient, TestBridge, CLIENT_KEY, OTHER_KEY};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn p2p_tunnel(store: &dyn Store, client_id: i32, password: &str) -> Tunnel {
    tunnel(store, TunnelMode::P2p, client_id, password)
}

fn tunnel(store: &dyn Store, mode: TunnelMode, client_id: i32, password: &str) -> Tunnel {
    Tunnel {
        id: store.next_task_id(),
        port: 0,
        server_ip: String::new(),
        mode,
        status: true,
        client_id,
        remark: String::new(),
        password: password.into(),
        local_path: String::new(),
        strip_pre: String::new(),
        target: Target::new("127.0.0.1:22"),
        flow: Flow::default(),
    }
}

#[tokio::test]
async fn test_p2p_notifies_owner_and_requester() {
    let bridge = TestBridge::start().await;
    bridge
        .store
        .new_tunnel(p2p_tunnel(bridge.store.as_ref(), 1, "pw"))
        .unwrap();

    let mut owner = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    let sessions = bridge.bridge.sessions().clone();
    assert!(wait_until(|| sessions.signal(1).is_some()).await);

    let mut requester = bridge.connect(OTHER_KEY, WorkType::P2p).await;
    let token = md5_hex("pw");
    requester.write(token.as_bytes()).await;

    assert_eq!(requester.read_len().await, b"127.0.0.1:6000");
    assert_eq!(&owner.read_flag().await, NEW_UDP_CONN);
    assert_eq!(owner.read_len().await, b"127.0.0.1:6000");
    assert_eq!(owner.read_len().await, token.as_bytes());
}

#[tokio::test]
async fn test_p2p_for_offline_owner_is_dropped() {
    let bridge = TestBridge::start().await;
    bridge
        .store
        .new_tunnel(p2p_tunnel(bridge.store.as_ref(), 2, "pw"))
        .unwrap();

    let mut requester = bridge.connect(CLIENT_KEY, WorkType::P2p).await;
    requester.write(md5_hex("pw").as_bytes()).await;
    assert!(requester.closed_by_peer().await);
}

#[tokio::test]
async fn test_secret_connections_are_handed_off_by_token() {
    let mut bridge = TestBridge::start().await;
    let handoffs = bridge.handoffs();
    let token = [b'k'; 32];

    let mut first = bridge.connect(CLIENT_KEY, WorkType::Secret).await;
    first.write(&token).await;
    let mut second = bridge.connect(OTHER_KEY, WorkType::Secret).await;
    second.write(&token).await;

    let recv = || async {
        tokio::time::timeout(Duration::from_secs(5), handoffs.secret.recv())
            .await
            .unwrap()
            .unwrap()
    };
    let a = recv().await;
    let b = recv().await;
    assert_eq!(a.token, token);
    assert_eq!(b.token, token);
    assert_ne!(a.conn.remote_addr(), b.conn.remote_addr());
}

#[tokio::test]
async fn test_unmatched_secret_times_out_when_configured() {
    let mut bridge = TestBridge::start_with(BridgeConfig {
        secret_match_timeout: Some(Duration::from_millis(100)),
        ..BridgeConfig::default()
    })
    .await;
    // held but never drained
    let _handoffs = bridge.handoffs();

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Secret).await;
    conn.write(&[b'z'; 32]).await;
    assert!(conn.closed_by_peer().await);
}

#[tokio::test]
async fn test_secret_visitor_reaches_owner_target() {
    let mut bridge = TestBridge::start().await;
    let handoffs = bridge.handoffs();
    let stored = bridge
        .store
        .new_tunnel(tunnel(bridge.store.as_ref(), TunnelMode::Secret, 1, "pw"))
        .unwrap();

    let RawClient { stream } = bridge.connect(CLIENT_KEY, WorkType::Chan).await;
    let addr = stream.peer_addr().unwrap();
    let (_carrier, incoming) =
        Multiplexer::spawn(Box::pin(stream), addr, true, Duration::from_secs(60));
    let sessions = bridge.bridge.sessions().clone();
    assert!(wait_until(|| sessions.tunnel(1).is_some()).await);

    let mut visitor = bridge.connect(OTHER_KEY, WorkType::Secret).await;
    visitor.write(md5_hex("pw").as_bytes()).await;
    let link = tokio::time::timeout(Duration::from_secs(5), handoffs.secret.recv())
        .await
        .unwrap()
        .unwrap();
    let serving = tokio::spawn({
        let bridge = bridge.bridge.clone();
        async move { bridge.serve_secret(link).await }
    });

    let mut owner_side = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    let mut len = [0u8; 4];
    owner_side.read_exact(&mut len).await.unwrap();
    let mut descriptor = vec![0u8; usize::try_from(i32::from_le_bytes(len)).unwrap()];
    owner_side.read_exact(&mut descriptor).await.unwrap();
    let received: Link = serde_json::from_slice(&descriptor).unwrap();
    assert_eq!(received.host, "127.0.0.1:22");
    assert_eq!(received.conn_type, "tcp");
    assert!(!received.remote_addr.is_empty());

    visitor.write(b"ping").await;
    let mut buf = [0u8; 4];
    owner_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    owner_side.write_all(b"pong").await.unwrap();
    assert_eq!(visitor.read_exact(4).await, b"pong");

    visitor.stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    owner_side.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    owner_side.shutdown().await.unwrap();
    assert!(visitor.closed_by_peer().await);
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stored.flow.inlet(), 4);
    assert_eq!(stored.flow.export(), 4);
}

#[tokio::test]
async fn test_secret_without_matching_task_is_closed() {
    let mut bridge = TestBridge::start().await;
    let handoffs = bridge.handoffs();
    // a p2p task with the same password is not a secret task
    bridge
        .store
        .new_tunnel(p2p_tunnel(bridge.store.as_ref(), 1, "pw"))
        .unwrap();

    let mut visitor = bridge.connect(OTHER_KEY, WorkType::Secret).await;
    visitor.write(md5_hex("pw").as_bytes()).await;
    let link = tokio::time::timeout(Duration::from_secs(5), handoffs.secret.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(bridge.bridge.serve_secret(link).await.is_err());
    assert!(visitor.closed_by_peer().await);
}

#[tokio::test]
async fn test_silent_secret_connection_hits_the_deadline() {
    let bridge = TestBridge::start_with(BridgeConfig {
        handshake_timeout: Duration::from_millis(200),
        ..BridgeConfig::default()
    })
    .await;

    let mut conn = bridge.connect(CLIENT_KEY, WorkType::Secret).await;
    assert!(conn.closed_by_peer().await);
}
