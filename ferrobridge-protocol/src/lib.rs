//! `FerroBridge` wire protocol
//!
//! This crate defines the byte-level protocol spoken between bridge clients
//! and the bridge: handshake tags, work-type and config flags, the
//! length-prefixed message codec, the multiplexer frame codec and the JSON
//! records carried inside length-prefixed messages.

pub mod codec;
pub mod constants;
pub mod flag;
pub mod frame;
pub mod message;
pub mod validation;

pub use codec::{LenPrefixCodec, MuxCodec};
pub use flag::{ConfigFlag, Flag, WorkType};
pub use frame::MuxFrame;
pub use message::{
    ClientConfig, HealthReport, HostConfig, Link, TargetConfig, TaskConfig, TunnelMode,
};
