//! Multiplexer frame definitions

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame exchanged on a multiplex carrier (`chan` / `file` connections)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MuxFrame {
    /// Open a new logical stream
    Open { stream_id: u32 },

    /// Payload for an open stream
    Data { stream_id: u32, data: Bytes },

    /// Close a logical stream
    Close { stream_id: u32 },

    /// Keepalive, carries no payload
    Ping,
}

impl MuxFrame {
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            MuxFrame::Open { stream_id }
            | MuxFrame::Data { stream_id, .. }
            | MuxFrame::Close { stream_id } => Some(*stream_id),
            MuxFrame::Ping => None,
        }
    }
}
