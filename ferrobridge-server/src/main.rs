//! FerroBridge server
//!
//! Runs the bridge control port together with the default consumers of its
//! handoff queues.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod consumers;

use anyhow::{Context, Result};
use clap::Parser;
use ferrobridge_common::{
    BridgeConfig, DEFAULT_BRIDGE_BIND, DEFAULT_BRIDGE_VERSION, DEFAULT_P2P_BIND,
};
use ferrobridge_core::ports::parse_ports;
use ferrobridge_core::{transport, Bridge, MemoryStore};
use ferrobridge_observability::{init_tracing, LogFormat, TracingConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control port address
    #[arg(long, default_value = DEFAULT_BRIDGE_BIND, env = "FERROBRIDGE_BIND")]
    bind: SocketAddr,

    /// UDP rendezvous address announced to P2P peers
    #[arg(long, default_value = DEFAULT_P2P_BIND, env = "FERROBRIDGE_P2P_ADDR")]
    p2p_addr: SocketAddr,

    /// Protocol version clients must declare
    #[arg(long, default_value = DEFAULT_BRIDGE_VERSION, env = "FERROBRIDGE_VERSION")]
    bridge_version: String,

    /// Verify key of the shared public client
    #[arg(long, env = "FERROBRIDGE_PUBLIC_VKEY")]
    public_vkey: Option<String>,

    /// JSON file with the client records to load at startup
    #[arg(long, env = "FERROBRIDGE_CLIENTS")]
    clients: Option<PathBuf>,

    /// Only dispatch links for registered source IPs
    #[arg(long, env = "FERROBRIDGE_IP_VERIFY")]
    ip_verify: bool,

    /// Ports tasks may bind, e.g. "8000-8100,9000" (empty allows all)
    #[arg(long, default_value = "", env = "FERROBRIDGE_ALLOW_PORTS")]
    allow_ports: String,

    /// Liveness sweep period in seconds
    #[arg(long, default_value_t = 5, env = "FERROBRIDGE_CHECK_INTERVAL")]
    check_interval: u64,

    /// Multiplexer idle timeout in seconds
    #[arg(long, default_value_t = 60, env = "FERROBRIDGE_DISCONNECT_TIMEOUT")]
    disconnect_timeout: u64,

    /// Give up on an unmatched secret connection after this many seconds
    #[arg(long, env = "FERROBRIDGE_SECRET_TIMEOUT")]
    secret_timeout: Option<u64>,

    /// Log output format (text or json)
    #[arg(long, default_value = "text", env = "FERROBRIDGE_LOG_FORMAT")]
    log_format: LogFormat,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "FERROBRIDGE_LOG")]
    log_level: String,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bind_addr: self.bind,
            p2p_addr: self.p2p_addr,
            version: self.bridge_version.clone(),
            ip_verify: self.ip_verify,
            allowed_ports: parse_ports(&self.allow_ports).into_iter().collect(),
            check_interval: Duration::from_secs(self.check_interval),
            disconnect_timeout: Duration::from_secs(self.disconnect_timeout),
            secret_match_timeout: self.secret_timeout.map(Duration::from_secs),
            ..BridgeConfig::default()
        }
    }

    fn store(&self) -> Result<MemoryStore> {
        let mut store = MemoryStore::new();
        if let Some(key) = &self.public_vkey {
            store = store.with_public_key(key.clone());
        }
        if let Some(path) = &self.clients {
            let json = std::fs::read(path)
                .with_context(|| format!("reading client records from {}", path.display()))?;
            let count = store.seed_clients(&json)?;
            info!("Loaded {} client records from {}", count, path.display());
        }
        Ok(store)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(TracingConfig {
        service_name: "ferrobridge-server".to_string(),
        format: args.log_format,
        default_filter: args.log_level.clone(),
    })?;

    info!("Starting FerroBridge Server v{}", env!("CARGO_PKG_VERSION"));

    let store = args.store()?;
    let (bridge, handoffs) = Bridge::new(args.bridge_config(), Arc::new(store))?;
    consumers::spawn(&bridge, handoffs);

    let listener = transport::bind(args.bind)
        .await
        .with_context(|| format!("binding control port {}", args.bind))?;

    tokio::select! {
        result = bridge.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
