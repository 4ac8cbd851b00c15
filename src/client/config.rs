//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::{
    codec::DEFAULT_MAX_PACKET_BODY_SIZE,
    connection::{ConnectionSettings, DispatchSettings},
    server::DEFAULT_PORT,
};

/// Settings for a [`PacketClient`](super::PacketClient).
///
/// ```
/// use tcpacket::client::ClientConfig;
///
/// let config: ClientConfig = ClientConfig {
///     address: "localhost".into(),
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.port, 9006);
/// assert_eq!(config.handler_pool_size, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP address of the server.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Largest encoded packet accepted from the server. Larger frames are
    /// skipped.
    pub max_packet_body_size: usize,
    /// Concurrent handler invocations when handlers are not blocking.
    pub handler_pool_size: usize,
    /// Run handlers inline on the read task, in registration order.
    pub blocking_handlers: bool,
    /// Log handler failures and transport errors at error level instead of
    /// debug.
    pub print_errors: bool,
    /// Period of the reply timeout sweep.
    pub reply_sweep_interval: Duration,
    /// Timeout used by `send_expecting_reply`.
    pub default_reply_timeout: Duration,
    /// Outbound packets buffered before `send` reports `QueueFull`.
    pub outbound_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
            max_packet_body_size: DEFAULT_MAX_PACKET_BODY_SIZE,
            handler_pool_size: 3,
            blocking_handlers: false,
            print_errors: false,
            reply_sweep_interval: Duration::from_secs(1),
            default_reply_timeout: Duration::from_secs(5),
            outbound_queue_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Check the configuration for values the client cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.address.is_empty() {
            return Err(ClientError::InvalidConfig("address must not be empty"));
        }
        if !self.blocking_handlers && self.handler_pool_size == 0 {
            return Err(ClientError::InvalidConfig(
                "handler_pool_size must be at least 1 unless handlers are blocking",
            ));
        }
        if self.reply_sweep_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "reply_sweep_interval must be non-zero",
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ClientError::InvalidConfig(
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
