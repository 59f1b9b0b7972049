//! Health monitor driven by reports on a client's signal connection

use super::Bridge;
use crate::store::Store;
use crate::transport::{SignalHandle, SignalReader};
use ferrobridge_common::ClientId;
use ferrobridge_protocol::{HealthReport, TunnelMode};
use tracing::{debug, info};

/// Read health reports until the signal connection fails, then tear the
/// session down if it still belongs to this signal connection.
pub(crate) async fn monitor(
    bridge: Bridge,
    client_id: ClientId,
    mut reader: SignalReader,
    signal: SignalHandle,
) {
    while let Some(report) = reader.next_report().await {
        match report {
            Ok(report) => {
                let changed = apply_report(bridge.store().as_ref(), client_id, &report);
                debug!(client_id, target = %report.target, up = report.up, changed, "health report");
            }
            Err(e) => {
                debug!(client_id, "health report error: {}", e);
                break;
            }
        }
    }

    info!(client_id, addr = %reader.remote_addr(), "signal connection closed");
    bridge.delete_client_with_signal(client_id, &signal).await;
}

/// Apply one report to every TCP tunnel and host of `client_id`.
///
/// Returns how many targets changed state.
pub fn apply_report(store: &dyn Store, client_id: ClientId, report: &HealthReport) -> usize {
    let target = report.target.as_str();
    let tunnel_targets = store
        .tunnels_of(client_id)
        .into_iter()
        .filter(|t| t.mode == TunnelMode::Tcp)
        .collect::<Vec<_>>();
    let hosts = store.hosts_of(client_id);

    let entities = tunnel_targets
        .iter()
        .map(|t| &t.target)
        .chain(hosts.iter().map(|h| &h.target));

    let mut changed = 0;
    for entity in entities {
        if report.up {
            if entity.mark_up(target) {
                changed += 1;
            }
        } else if entity.mentions(target) {
            entity.mark_down(target);
            changed += 1;
        }
    }
    changed
}
