//! Handlers for each work type after a successful handshake

use super::handoff::SecretLink;
use super::handshake::Handshake;
use super::{config, health, Bridge};
use crate::session::ClientSession;
use crate::stream::{Multiplexer, VirtualStream};
use crate::transport::conn::read_error;
use crate::transport::BridgeConn;
use ferrobridge_common::ClientId;
use ferrobridge_protocol::constants::TOKEN_LEN;
use ferrobridge_protocol::WorkType;
use kanal::AsyncReceiver;
use tracing::{debug, error, info, warn};

impl Bridge {
    pub(crate) async fn dispatch_work(&self, mut conn: BridgeConn, hs: Handshake) {
        if hs.work.is_long_lived() {
            conn.clear_read_deadline();
        }
        let Handshake {
            client_id,
            client_version,
            work,
        } = hs;

        match work {
            WorkType::Main => self.handle_main(conn, client_id, client_version),
            WorkType::Chan => self.handle_chan(conn, client_id, client_version),
            WorkType::File => self.handle_file(conn, client_id, client_version),
            WorkType::Config => config::serve(self, conn, client_id).await,
            WorkType::Register => self.handle_register(conn).await,
            WorkType::Secret => self.handle_secret(conn).await,
            WorkType::P2p => self.handle_p2p(conn).await,
        }
    }

    /// Install the signal connection and start its health monitor.
    fn handle_main(&self, conn: BridgeConn, client_id: ClientId, version: String) {
        let addr = conn.remote_addr();
        if self.store().is_public_client(client_id) {
            debug!(client_id, addr = %addr, "main connection refused for the public client");
            return;
        }

        let (reader, signal) = conn.into_signal();
        let installed = signal.clone();
        self.sessions().upsert(
            client_id,
            ClientSession::with_signal(signal.clone(), version.clone()),
            move |session| session.replace_signal(installed, version),
        );

        tokio::spawn(health::monitor(self.clone(), client_id, reader, signal));
        info!(client_id, addr = %addr, "client connection succeeded");
    }

    fn attach_carrier(&self, conn: BridgeConn) -> Multiplexer {
        let addr = conn.remote_addr();
        let (mux, incoming) = Multiplexer::spawn(
            conn.into_stream(),
            addr,
            false,
            self.config().disconnect_timeout,
        );
        tokio::spawn(drop_incoming(incoming));
        mux
    }

    fn handle_chan(&self, conn: BridgeConn, client_id: ClientId, version: String) {
        let mux = self.attach_carrier(conn);
        let installed = mux.clone();
        self.sessions().upsert(
            client_id,
            ClientSession::with_tunnel(mux, version),
            move |session| session.set_tunnel(installed),
        );
        debug!(client_id, "tunnel carrier attached");
    }

    fn handle_file(&self, conn: BridgeConn, client_id: ClientId, version: String) {
        let mux = self.attach_carrier(conn);
        let installed = mux.clone();
        self.sessions().upsert(
            client_id,
            ClientSession::with_file(mux, version),
            move |session| session.set_file(installed),
        );
        debug!(client_id, "file carrier attached");
    }

    async fn handle_register(&self, mut conn: BridgeConn) {
        match conn.read_i32().await {
            Ok(hours) => {
                let ip = conn.remote_addr().ip().to_string();
                let expiry = self.registered_ips().register(ip.clone(), hours);
                info!(%ip, %expiry, "ip registered");
            }
            Err(e) => debug!("register error: {}", read_error("hours", e)),
        }
        conn.shutdown().await;
    }

    async fn handle_secret(&self, mut conn: BridgeConn) {
        let token = match conn.read_bytes(TOKEN_LEN).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    "secret error, failed to match the key successfully: {}",
                    read_error("token", e)
                );
                return;
            }
        };
        conn.clear_read_deadline();
        if let Err(e) = self.handoff().secret(SecretLink { token, conn }).await {
            error!("secret error, {}", e);
        }
    }

    async fn handle_p2p(&self, mut conn: BridgeConn) {
        let token = match conn.read_bytes(TOKEN_LEN).await {
            Ok(token) => token,
            Err(e) => {
                error!("p2p error, {}", read_error("token", e));
                return;
            }
        };
        let Some(tunnel) = self.store().tunnel_by_password_hash(&token) else {
            error!("p2p error, failed to match the key successfully");
            return;
        };
        if !self.sessions().contains(tunnel.client_id) {
            return;
        }
        let Some(signal) = self.sessions().signal(tunnel.client_id) else {
            warn!(client_id = tunnel.client_id, "p2p request for a client without signal connection");
            return;
        };

        let rendezvous = self.config().p2p_addr.to_string();
        if let Err(e) = signal.send_new_udp_conn(&rendezvous, &token).await {
            warn!(client_id = tunnel.client_id, "p2p notice failed: {}", e);
            return;
        }
        if let Err(e) = conn.write_len_content(rendezvous.as_bytes()).await {
            debug!("p2p reply failed: {}", e);
        }
        conn.shutdown().await;
    }
}

/// The bridge never accepts streams opened by a client.
async fn drop_incoming(incoming: AsyncReceiver<VirtualStream>) {
    while let Ok(stream) = incoming.recv().await {
        warn!(stream_id = stream.id(), "client tried to open a stream, dropping it");
    }
}
