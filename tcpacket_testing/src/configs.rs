//! Loopback configurations for tests.

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use rstest::fixture;
use tcpacket::{ClientConfig, ServerConfig};

/// Reply sweep period used by test endpoints.
pub const TEST_SWEEP: Duration = Duration::from_millis(20);

#[fixture]
/// Loopback server on an ephemeral port with inline handlers and a fast
/// reply sweep.
pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind_address: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        blocking_handlers: true,
        reply_sweep_interval: TEST_SWEEP,
        ..ServerConfig::default()
    }
}

/// Client reaching `addr` with inline handlers and a fast reply sweep.
#[must_use]
pub fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        address: addr.ip().to_string(),
        port: addr.port(),
        blocking_handlers: true,
        reply_sweep_interval: TEST_SWEEP,
        ..ClientConfig::default()
    }
}
