//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};

use rstest::fixture;
use tokio::runtime::Handle;

use super::ServerConfig;
use crate::{
    connection::Endpoint,
    dispatch::HandlerRegistry,
    id::IdGenerator,
};

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents races where another process could
/// claim the port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

#[fixture]
/// Loopback configuration with inline handlers and a fast reply sweep.
pub fn config() -> ServerConfig {
    ServerConfig {
        bind_address: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        max_connections: 2,
        blocking_handlers: true,
        reply_sweep_interval: Duration::from_millis(20),
        ..ServerConfig::default()
    }
}

/// Endpoint built from `config` with no handlers registered.
pub fn endpoint(config: &ServerConfig) -> Arc<Endpoint> {
    Endpoint::start(
        &Handle::current(),
        Arc::new(HandlerRegistry::default()),
        Arc::new(IdGenerator::new()),
        config.connection_settings(),
        config.dispatch_settings(),
    )
}
