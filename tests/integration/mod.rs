#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for `FerroBridge`
//!
//! Every test drives a real bridge over loopback sockets.

mod config_test;
mod dispatch_test;
mod handshake_test;
mod nat_test;
mod session_test;
