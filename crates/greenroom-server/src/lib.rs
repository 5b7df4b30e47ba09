//! Greenroom server: the HTTP API plus the realtime socket gateway.
//!
//! The binary in `main.rs` is a thin wrapper; everything lives here so the
//! integration tests can boot the full stack on an ephemeral port.

pub mod config;
pub mod server;
pub mod telemetry;
