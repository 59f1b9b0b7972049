//! Handshake and short-lived work types

use ferrobridge_core::auth::md5_hex;
use ferrobridge_protocol::constants::VERIFY_ERROR;
use ferrobridge_protocol::WorkType;
use ferrobridge_tests::{wait_until, RawClient, TestBridge, CLIENT_KEY};

#[tokio::test]
async fn test_proof_is_hash_of_version() {
    let bridge = TestBridge::start().await;
    let mut client = RawClient::connect(bridge.addr).await;
    client.send_versions(&bridge.version(), "test-client").await;
    assert_eq!(client.read_proof().await, md5_hex(bridge.version()).into_bytes());
}

#[tokio::test]
async fn test_version_mismatch_never_gets_proof() {
    let bridge = TestBridge::start().await;
    let mut client = RawClient::connect(bridge.addr).await;
    client.send_versions("0.0.1", "test-client").await;
    assert!(client.closed_by_peer().await, "bridge must close without a proof");
    assert!(bridge.bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_unknown_verify_key_is_rejected() {
    let bridge = TestBridge::start().await;
    let mut client = RawClient::connect(bridge.addr).await;
    client.send_versions(&bridge.version(), "test-client").await;
    client.read_proof().await;
    assert_eq!(&client.verify("nobody").await, VERIFY_ERROR);
    assert!(client.closed_by_peer().await);
}

#[tokio::test]
async fn test_unknown_work_flag_closes() {
    let bridge = TestBridge::start().await;
    let mut client = RawClient::connect(bridge.addr).await;
    client.send_versions(&bridge.version(), "test-client").await;
    client.read_proof().await;
    client.verify(CLIENT_KEY).await;
    client.write(b"zzzz").await;
    assert!(client.closed_by_peer().await);
}

#[tokio::test]
async fn test_register_records_peer_ip() {
    let bridge = TestBridge::start().await;
    let mut client = bridge.connect(CLIENT_KEY, WorkType::Register).await;
    client.write(&2i32.to_le_bytes()).await;
    assert!(client.closed_by_peer().await);

    let ips = bridge.bridge.registered_ips().clone();
    assert!(wait_until(|| ips.expiry("127.0.0.1").is_some()).await);
    let expiry = ips.expiry("127.0.0.1").unwrap();
    let remaining = expiry - chrono::Utc::now();
    assert!(remaining > chrono::Duration::minutes(119));
    assert!(remaining <= chrono::Duration::hours(2));
}
