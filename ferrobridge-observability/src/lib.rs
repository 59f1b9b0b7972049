//! Logging setup shared by the FerroBridge binaries and tests

pub mod tracing;

pub use tracing::{init_tracing, LogFormat, TracingConfig};
