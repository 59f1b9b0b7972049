#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Shared harness for the `FerroBridge` integration tests
//!
//! [`TestBridge`] runs a real bridge on an ephemeral loopback port and
//! [`RawClient`] speaks the wire protocol byte by byte.

use ferrobridge_common::BridgeConfig;
use ferrobridge_core::auth::md5_hex;
use ferrobridge_core::{transport, Bridge, BridgeHandoffs, MemoryStore};
use ferrobridge_protocol::constants::{FLAG_LEN, VERIFY_SUCCESS};
use ferrobridge_protocol::WorkType;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Verify key of the seeded client with id 1
pub const CLIENT_KEY: &str = "client-key";
/// Verify key of the seeded client with id 2
pub const OTHER_KEY: &str = "other-key";
/// Verify key of the public client
pub const PUBLIC_KEY: &str = "public-key";

pub struct TestBridge {
    pub bridge: Bridge,
    pub store: Arc<MemoryStore>,
    pub addr: SocketAddr,
    pub handoffs: Option<BridgeHandoffs>,
    task: JoinHandle<()>,
}

impl TestBridge {
    pub async fn start() -> Self {
        Self::start_with(BridgeConfig::default()).await
    }

    pub async fn start_with(mut config: BridgeConfig) -> Self {
        let _ = ferrobridge_observability::init_tracing(ferrobridge_observability::TracingConfig {
            default_filter: "warn".into(),
            ..Default::default()
        });

        let store = MemoryStore::new().with_public_key(PUBLIC_KEY);
        store
            .seed_clients(
                format!(
                    r#"[{{"Id":1,"VerifyKey":"{CLIENT_KEY}","ConfigConnAllow":true}},
                        {{"Id":2,"VerifyKey":"{OTHER_KEY}","ConfigConnAllow":true}}]"#
                )
                .as_bytes(),
            )
            .unwrap();
        let store = Arc::new(store);

        let listener = transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        config.bind_addr = addr;
        config.p2p_addr = "127.0.0.1:6000".parse().unwrap();

        let (bridge, handoffs) = Bridge::new(config, store.clone()).unwrap();
        let runner = bridge.clone();
        let task = tokio::spawn(async move {
            let _ = runner.run(listener).await;
        });

        Self {
            bridge,
            store,
            addr,
            handoffs: Some(handoffs),
            task,
        }
    }

    pub fn handoffs(&mut self) -> BridgeHandoffs {
        self.handoffs.take().expect("handoffs already taken")
    }

    pub fn version(&self) -> String {
        self.bridge.config().version.clone()
    }

    /// Connect and complete the handshake for `work`.
    pub async fn connect(&self, verify_key: &str, work: WorkType) -> RawClient {
        let mut client = RawClient::connect(self.addr).await;
        client.send_versions(&self.version(), "test-client").await;
        client.read_proof().await;
        assert_eq!(&client.verify(verify_key).await, VERIFY_SUCCESS);
        client.write(work.tag()).await;
        client
    }
}

impl Drop for TestBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A client speaking the bridge protocol by hand
pub struct RawClient {
    pub stream: TcpStream,
}

impl RawClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn write_len(&mut self, content: &[u8]) {
        let len = i32::try_from(content.len()).unwrap();
        self.write(&len.to_le_bytes()).await;
        self.write(content).await;
    }

    pub async fn write_json<T: serde::Serialize>(&mut self, value: &T) {
        self.write_len(&serde_json::to_vec(value).unwrap()).await;
    }

    pub async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf
    }

    pub async fn read_flag(&mut self) -> [u8; FLAG_LEN] {
        let mut flag = [0u8; FLAG_LEN];
        flag.copy_from_slice(&self.read_exact(FLAG_LEN).await);
        flag
    }

    pub async fn read_bool(&mut self) -> bool {
        self.read_exact(1).await[0] == 1
    }

    pub async fn read_len(&mut self) -> Vec<u8> {
        let raw = self.read_exact(4).await;
        let len = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        self.read_exact(usize::try_from(len).unwrap()).await
    }

    /// True once the bridge has closed the connection
    pub async fn closed_by_peer(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.stream.read_to_end(&mut rest)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    pub async fn send_versions(&mut self, declared: &str, own: &str) {
        self.write(b"TST").await;
        self.write_len(declared.as_bytes()).await;
        self.write_len(own.as_bytes()).await;
    }

    /// Read the 32-byte server proof
    pub async fn read_proof(&mut self) -> Vec<u8> {
        self.read_exact(32).await
    }

    /// Present `verify_key` and return the outcome flag.
    pub async fn verify(&mut self, verify_key: &str) -> [u8; FLAG_LEN] {
        self.write(md5_hex(verify_key).as_bytes()).await;
        self.read_flag().await
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// A loopback TCP port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
