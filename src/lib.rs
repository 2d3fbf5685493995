//! Measures the lifetime of TCP connections seen in captured traffic.
//!
//! Packets are reduced to [`PacketSignal`]s, grouped under direction-independent
//! [`FlowKey`]s and driven through a small handshake/teardown state machine.
//! Every connection that closes (reset, or FIN followed by two ACKs) is
//! collected and finally ranked by duration.

pub mod config;
pub mod listener;
pub mod logging;
pub mod report;

pub use config::AppConfig;
pub use listener::packet::*;
pub use listener::tracking::*;
pub use listener::Settings;
