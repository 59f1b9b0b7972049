//! Serving secret connections handed off by the bridge

use super::handoff::SecretLink;
use super::Bridge;
use crate::model::Tunnel;
use ferrobridge_common::{BridgeError, Result};
use ferrobridge_protocol::{Link, TunnelMode};
use std::sync::Arc;
use tracing::{debug, info};

impl Bridge {
    /// Connect a secret visitor to the target of the secret task its token
    /// names, through the owning client.
    ///
    /// The token is the hex MD5 of the task password. The visitor connection
    /// is closed when no secret task matches or the client cannot be reached.
    pub async fn serve_secret(&self, link: SecretLink) -> Result<()> {
        let SecretLink { token, mut conn } = link;
        let visitor = conn.remote_addr();

        let Some(tunnel) = self.secret_task(&token) else {
            conn.shutdown().await;
            return Err(BridgeError::Verify(format!(
                "no secret task matches the token from {visitor}"
            )));
        };
        let Some(target) = tunnel.target.live_targets().into_iter().next() else {
            conn.shutdown().await;
            return Err(BridgeError::Protocol(format!(
                "secret task {} has no target",
                tunnel.id
            )));
        };

        let (crypt, compress) = self
            .store()
            .client(tunnel.client_id)
            .map_or((false, false), |c| (c.crypt, c.compress));
        let mut request = Link::new(
            "tcp",
            target,
            crypt,
            compress,
            visitor.to_string(),
            tunnel.target.local_proxy(),
        );

        let mut upstream = match self
            .send_link_info(tunnel.client_id, &mut request, Some(&tunnel))
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                conn.shutdown().await;
                return Err(e);
            }
        };
        info!(task_id = tunnel.id, addr = %visitor, target = %request.host, "secret link opened");

        let mut downstream = conn.into_stream();
        let (inlet, export) = tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await?;
        tunnel.flow.add(inlet, export);
        debug!(
            task_id = tunnel.id,
            inlet = tunnel.flow.inlet(),
            export = tunnel.flow.export(),
            "secret link closed"
        );
        Ok(())
    }

    fn secret_task(&self, token: &[u8]) -> Option<Arc<Tunnel>> {
        self.store()
            .tunnel_by_password_hash(token)
            .filter(|t| t.mode == TunnelMode::Secret)
    }
}
