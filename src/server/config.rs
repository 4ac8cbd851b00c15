//! Server configuration.
//!
//! [`ServerConfig`] is a plain value consumed by
//! [`PacketServer::new`](super::PacketServer::new). Every field has a default,
//! and missing fields fall back to it when the configuration is deserialized.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::{BackoffConfig, ServerError};
use crate::{
    codec::DEFAULT_MAX_PACKET_BODY_SIZE,
    connection::{ConnectionSettings, DispatchSettings},
};

/// Port both roles use unless configured otherwise.
pub const DEFAULT_PORT: u16 = 9006;

/// Settings for a [`PacketServer`](super::PacketServer).
///
/// ```
/// use tcpacket::server::ServerConfig;
///
/// let config = ServerConfig {
///     port: 0,
///     max_connections: 2,
///     ..ServerConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.handler_pool_size, 10);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_address: IpAddr,
    /// Port the listener binds to; `0` picks an ephemeral port.
    pub port: u16,
    /// Number of connections served concurrently. Further connections wait
    /// in the accept backlog until a slot frees up.
    pub max_connections: usize,
    /// Largest encoded packet accepted from a peer. Larger frames are skipped.
    pub max_packet_body_size: usize,
    /// Concurrent handler invocations when handlers are not blocking.
    pub handler_pool_size: usize,
    /// Run handlers inline on the connection's read task, in registration
    /// order.
    pub blocking_handlers: bool,
    /// Log handler failures and transport errors at error level instead of
    /// debug.
    pub print_errors: bool,
    /// Period of the reply timeout sweep.
    pub reply_sweep_interval: Duration,
    /// Timeout used by `send_expecting_reply`.
    pub default_reply_timeout: Duration,
    /// Outbound packets buffered per connection before `send` reports
    /// `QueueFull`.
    pub outbound_queue_capacity: usize,
    /// Retry policy for failing `accept()` calls.
    pub backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: 20,
            max_packet_body_size: DEFAULT_MAX_PACKET_BODY_SIZE,
            handler_pool_size: 10,
            blocking_handlers: false,
            print_errors: false,
            reply_sweep_interval: Duration::from_secs(1),
            default_reply_timeout: Duration::from_secs(5),
            outbound_queue_capacity: 1024,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Address the listener binds to.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr { SocketAddr::new(self.bind_address, self.port) }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig("max_connections must be at least 1"));
        }
        if !self.blocking_handlers && self.handler_pool_size == 0 {
            return Err(ServerError::InvalidConfig(
                "handler_pool_size must be at least 1 unless handlers are blocking",
            ));
        }
        if self.reply_sweep_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "reply_sweep_interval must be non-zero",
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "outbound_queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }

    pub(crate) fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_packet_body_size: self.max_packet_body_size,
            outbound_queue_capacity: self.outbound_queue_capacity,
            default_reply_timeout: self.default_reply_timeout,
            print_errors: self.print_errors,
        }
    }

    pub(crate) fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            blocking_handlers: self.blocking_handlers,
            handler_pool_size: self.handler_pool_size,
            reply_sweep_interval: self.reply_sweep_interval,
        }
    }
}
