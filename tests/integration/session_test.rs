//! Session registry behavior over real signal and carrier connections

use ferrobridge_core::model::{Flow, Target, Tunnel};
use ferrobridge_core::Store;
use ferrobridge_protocol::constants::RES_CLOSE;
use ferrobridge_protocol::{HealthReport, TunnelMode, WorkType};
use ferrobridge_tests::{wait_until, TestBridge, CLIENT_KEY, PUBLIC_KEY};
use std::time::Duration;

fn tcp_tunnel(store: &dyn Store, target: &str) -> Tunnel {
    Tunnel {
        id: store.next_task_id(),
        port: 0,
        server_ip: String::new(),
        mode: TunnelMode::Tcp,
        status: true,
        client_id: 1,
        remark: "web".into(),
        password: String::new(),
        local_path: String::new(),
        strip_pre: String::new(),
        target: Target::new(target),
        flow: Flow::default(),
    }
}

#[tokio::test]
async fn test_main_and_chan_share_one_session() {
    let bridge = TestBridge::start().await;
    let _main = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    let _chan = bridge.connect(CLIENT_KEY, WorkType::Chan).await;

    let sessions = bridge.bridge.sessions().clone();
    assert!(wait_until(|| sessions.signal(1).is_some() && sessions.tunnel(1).is_some()).await);
    assert_eq!(sessions.ids(), vec![1]);
    assert_eq!(sessions.version(1).as_deref(), Some("test-client"));
}

#[tokio::test]
async fn test_second_main_supersedes_first() {
    let bridge = TestBridge::start().await;
    let sessions = bridge.bridge.sessions().clone();

    let mut first = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    assert!(wait_until(|| sessions.signal(1).is_some()).await);
    let first_id = sessions.signal(1).unwrap().id();

    let _second = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    assert_eq!(&first.read_flag().await, RES_CLOSE);
    assert!(first.closed_by_peer().await);

    assert!(wait_until(|| sessions.signal(1).is_some_and(|s| s.id() != first_id)).await);
    // the superseded monitor must not take the new session with it
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sessions.ids(), vec![1]);
    assert!(sessions.signal(1).is_some_and(|s| !s.is_closed()));
}

#[tokio::test]
async fn test_signal_loss_deletes_session_and_reports_client() {
    let mut bridge = TestBridge::start().await;
    let handoffs = bridge.handoffs();
    let sessions = bridge.bridge.sessions().clone();

    let main = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    assert!(wait_until(|| sessions.contains(1)).await);
    drop(main);

    let closed = tokio::time::timeout(Duration::from_secs(5), handoffs.close_client.recv())
        .await
        .expect("no close-client handoff")
        .unwrap();
    assert_eq!(closed, 1);
    assert!(!sessions.contains(1));
}

#[tokio::test]
async fn test_public_client_cannot_register_main() {
    let bridge = TestBridge::start().await;
    let mut main = bridge.connect(PUBLIC_KEY, WorkType::Main).await;
    assert!(main.closed_by_peer().await);
    assert!(bridge.bridge.sessions().is_empty());
}

#[tokio::test]
async fn test_health_reports_move_targets() {
    let bridge = TestBridge::start().await;
    let store = bridge.store.clone();
    let tunnel = store
        .new_tunnel(tcp_tunnel(store.as_ref(), "10.0.0.1:80\n10.0.0.2:80"))
        .unwrap();

    let mut main = bridge.connect(CLIENT_KEY, WorkType::Main).await;
    let down = HealthReport {
        target: "10.0.0.1:80".into(),
        up: false,
    };
    main.write_len(down.encode().as_bytes()).await;
    assert!(wait_until(|| tunnel.target.live_targets() == vec!["10.0.0.2:80"]).await);
    assert_eq!(tunnel.target.snapshot().removed, vec!["10.0.0.1:80"]);

    let up = HealthReport {
        target: "10.0.0.1:80".into(),
        up: true,
    };
    main.write_len(up.encode().as_bytes()).await;
    assert!(wait_until(|| tunnel.target.snapshot().removed.is_empty()).await);
    let mut live = tunnel.target.live_targets();
    live.sort();
    assert_eq!(live, vec!["10.0.0.1:80", "10.0.0.2:80"]);
}
