//! Handshake every bridge connection goes through before dispatch

use crate::auth::md5_hex;
use crate::store::Store;
use crate::transport::conn::read_error;
use crate::transport::BridgeConn;
use ferrobridge_common::{BridgeConfig, BridgeError, ClientId, Result};
use ferrobridge_protocol::constants::{PROBE_LEN, VERIFY_ERROR, VERIFY_KEY_LEN, VERIFY_SUCCESS};
use ferrobridge_protocol::WorkType;
use tracing::{debug, info};

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub client_id: ClientId,
    /// Version the client reported about itself
    pub client_version: String,
    pub work: WorkType,
}

/// Run the handshake up to and including the work-type flag.
///
/// On return the read deadline is still set; the caller clears it for
/// long-lived work types.
pub async fn perform(
    conn: &mut BridgeConn,
    config: &BridgeConfig,
    store: &dyn Store,
) -> Result<Handshake> {
    let addr = conn.remote_addr();

    conn.read_bytes(PROBE_LEN)
        .await
        .map_err(|e| read_error("probe", e))?;

    let declared = conn
        .read_len_content()
        .await
        .map_err(|e| read_error("version", e))?;
    if declared != config.version.as_bytes() {
        return Err(BridgeError::VersionMismatch {
            expected: config.version.clone(),
            actual: String::from_utf8_lossy(&declared).into_owned(),
        });
    }

    let reported = conn
        .read_len_content()
        .await
        .map_err(|e| read_error("client version", e))?;
    let client_version = String::from_utf8_lossy(&reported).into_owned();

    conn.write_all(md5_hex(&config.version).as_bytes()).await?;
    conn.set_read_deadline(config.handshake_timeout);

    let presented = conn
        .read_bytes(VERIFY_KEY_LEN)
        .await
        .map_err(|e| read_error("verify key", e))?;
    let client_id = match store.client_id_by_verify_key_and_addr(&presented, addr) {
        Ok(id) => id,
        Err(e) => {
            info!(addr = %addr, "Current client connection validation error, close this client");
            conn.write_flag(VERIFY_ERROR).await?;
            return Err(e);
        }
    };
    conn.write_flag(VERIFY_SUCCESS).await?;

    let flag = conn
        .read_flag()
        .await
        .map_err(|e| read_error("work flag", e))?;
    let work = WorkType::from_flag(flag)
        .ok_or_else(|| BridgeError::Protocol(format!("unknown work flag {flag}")))?;

    debug!(client_id, addr = %addr, %work, "handshake complete");
    Ok(Handshake {
        client_id,
        client_version,
        work,
    })
}
