//! Record validation for the config sub-protocol

use crate::message::{HostConfig, TaskConfig, TunnelMode};

/// Default upper bound for a length-prefixed message (32 KiB)
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 32 << 10;

/// Validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Host domain is empty")]
    EmptyHost,

    #[error("Task ports are empty for {0} mode")]
    EmptyPorts(TunnelMode),

    #[error("Task target is empty")]
    EmptyTarget,
}

/// Validate a host record received on the config channel
pub fn validate_host(host: &HostConfig) -> Result<(), ValidationError> {
    if host.host.trim().is_empty() {
        return Err(ValidationError::EmptyHost);
    }
    if host.target.target_str.trim().is_empty() {
        return Err(ValidationError::EmptyTarget);
    }
    Ok(())
}

/// Validate a task record received on the config channel
///
/// Secret and P2P tasks never bind a port, so only the other modes need one.
pub fn validate_task(task: &TaskConfig) -> Result<(), ValidationError> {
    if !task.mode.binds_port() {
        return Ok(());
    }
    if task.ports.trim().is_empty() {
        return Err(ValidationError::EmptyPorts(task.mode));
    }
    Ok(())
}
