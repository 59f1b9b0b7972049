//! Outbound link dispatch: ask a client to open one connection for us

use super::Bridge;
use crate::ip_registry::ip_of;
use crate::model::Tunnel;
use crate::transport::{self, BoxedStream};
use chrono::Utc;
use ferrobridge_common::{BridgeError, ClientId, Result};
use ferrobridge_protocol::{LenPrefixCodec, Link, TunnelMode};
use tokio::io::AsyncWriteExt;
use tracing::info;

impl Bridge {
    /// Open a stream to the target described by `link` through `client_id`.
    ///
    /// Local-proxy links are dialled from the bridge host. Everything else
    /// opens a stream on the client's tunnel multiplexer (the file
    /// multiplexer for file tunnels) and, except in file mode, forwards the
    /// link descriptor on it.
    pub async fn send_link_info(
        &self,
        client_id: ClientId,
        link: &mut Link,
        tunnel: Option<&Tunnel>,
    ) -> Result<BoxedStream> {
        if link.local_proxy {
            return transport::dial(&link.host).await.map_err(|e| {
                info!(target_addr = %link.host, "local proxy dial failed: {}", e);
                BridgeError::DialRefused(link.host.clone())
            });
        }

        if !self.sessions().contains(client_id) {
            return Err(BridgeError::ClientNotConnected(client_id));
        }

        if self.config().ip_verify {
            self.registered_ips()
                .verify(&ip_of(&link.remote_addr), Utc::now())?;
        }

        let file_mode = tunnel.is_some_and(|t| t.mode == TunnelMode::File);
        let carrier = if file_mode {
            self.sessions().file(client_id)
        } else {
            self.sessions().tunnel(client_id)
        }
        .ok_or(BridgeError::ClientNotFullyConnected(client_id))?;

        let mut stream = carrier.open_stream().await?;

        if file_mode {
            link.crypt = false;
            link.compress = false;
            return Ok(Box::pin(stream));
        }

        let descriptor = link.to_json()?;
        let framed = LenPrefixCodec::new(self.config().max_message_len).frame(&descriptor)?;
        if let Err(e) = stream.write_all(&framed).await {
            info!(
                client_id,
                "new connect error, the target {} refuse to connect: {}", link.host, e
            );
            return Err(BridgeError::DialRefused(link.host.clone()));
        }
        Ok(Box::pin(stream))
    }
}
