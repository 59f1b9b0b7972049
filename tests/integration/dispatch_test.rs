//! Outbound link dispatch through a client's tunnel carrier

use chrono::{Duration as ChronoDuration, Utc};
use ferrobridge_common::{BridgeConfig, BridgeError};
use ferrobridge_core::model::{Flow, Target, Tunnel};
use ferrobridge_core::{Multiplexer, VirtualStream};
use ferrobridge_protocol::{Link, TunnelMode, WorkType};
use ferrobridge_tests::{wait_until, RawClient, TestBridge, CLIENT_KEY};
use kanal::AsyncReceiver;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn link(remote_addr: &str) -> Link {
    Link::new("tcp", "127.0.0.1:22", true, true, remote_addr, false)
}

/// Attach a chan carrier for client 1 and return the client end of it.
async fn attach_chan(bridge: &TestBridge) -> (Multiplexer, AsyncReceiver<VirtualStream>) {
    let RawClient { stream } = bridge.connect(CLIENT_KEY, WorkType::Chan).await;
    let addr = stream.peer_addr().unwrap();
    let carrier = Multiplexer::spawn(Box::pin(stream), addr, true, Duration::from_secs(60));
    let sessions = bridge.bridge.sessions().clone();
    assert!(wait_until(|| sessions.tunnel(1).is_some()).await);
    carrier
}

#[tokio::test]
async fn test_unknown_client_is_not_connected() {
    let bridge = TestBridge::start().await;
    let err = bridge
        .bridge
        .send_link_info(7, &mut link("203.0.113.7:5000"), None)
        .await
        .err()
        .expect("link should be refused");
    assert!(matches!(err, BridgeError::ClientNotConnected(7)));
}

#[tokio::test]
async fn test_descriptor_reaches_the_client() {
    let bridge = TestBridge::start().await;
    let (_carrier, incoming) = attach_chan(&bridge).await;

    let mut sent = link("203.0.113.7:5000");
    let mut bridge_side = bridge.bridge.send_link_info(1, &mut sent, None).await.unwrap();

    let mut client_side = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    let mut len = [0u8; 4];
    client_side.read_exact(&mut len).await.unwrap();
    let mut descriptor = vec![0u8; usize::try_from(i32::from_le_bytes(len)).unwrap()];
    client_side.read_exact(&mut descriptor).await.unwrap();
    let received: Link = serde_json::from_slice(&descriptor).unwrap();
    assert_eq!(received, sent);

    bridge_side.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client_side.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn test_file_tunnel_needs_file_carrier() {
    let bridge = TestBridge::start().await;
    let (_carrier, _incoming) = attach_chan(&bridge).await;
    let tunnel = Tunnel {
        id: 1,
        port: 0,
        server_ip: String::new(),
        mode: TunnelMode::File,
        status: true,
        client_id: 1,
        remark: String::new(),
        password: String::new(),
        local_path: "/srv".into(),
        strip_pre: String::new(),
        target: Target::new(""),
        flow: Flow::default(),
    };

    let err = bridge
        .bridge
        .send_link_info(1, &mut link("203.0.113.7:5000"), Some(&tunnel))
        .await
        .err()
        .expect("link should be refused");
    assert!(matches!(err, BridgeError::ClientNotFullyConnected(1)));
}

#[tokio::test]
async fn test_ip_verification_reasons() {
    let bridge = TestBridge::start_with(BridgeConfig {
        ip_verify: true,
        ..BridgeConfig::default()
    })
    .await;
    let (_carrier, _incoming) = attach_chan(&bridge).await;

    let err = bridge
        .bridge
        .send_link_info(1, &mut link("203.0.113.7:5000"), None)
        .await
        .err()
        .expect("link should be refused");
    assert!(matches!(err, BridgeError::IpNotRegistered(ref ip) if ip == "203.0.113.7"));

    bridge
        .bridge
        .registered_ips()
        .register_until("203.0.113.7", Utc::now() - ChronoDuration::minutes(1));
    let err = bridge
        .bridge
        .send_link_info(1, &mut link("203.0.113.7:5000"), None)
        .await
        .err()
        .expect("link should be refused");
    assert!(matches!(err, BridgeError::IpExpired(ref ip) if ip == "203.0.113.7"));

    bridge.bridge.registered_ips().register("203.0.113.7", 1);
    assert!(bridge
        .bridge
        .send_link_info(1, &mut link("203.0.113.7:5000"), None)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_local_proxy_dial_failure_is_refused() {
    let bridge = TestBridge::start().await;
    let port = ferrobridge_tests::free_port();
    let mut local = Link::new("tcp", format!("127.0.0.1:{port}"), false, false, "", true);
    let err = bridge
        .bridge
        .send_link_info(1, &mut local, None)
        .await
        .err()
        .expect("link should be refused");
    assert!(matches!(err, BridgeError::DialRefused(_)));
}
