//! Tokio-based packet server.
//!
//! [`PacketServer`] listens on a TCP socket and serves up to
//! `max_connections` connections at once. Every connection shares the
//! server's handlers, reply correlator and id generator. Handlers may be
//! registered before or after the server starts; a dispatch that is already
//! in flight keeps using the handler lists it started with.
//!
//! ```no_run
//! use tcpacket::{Packet, server::{PacketServer, ServerConfig}};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tcpacket::server::ServerError> {
//! let server = PacketServer::new(ServerConfig::default());
//! server.on_packet(|packet: &Packet| {
//!     println!("received {:?}", packet.body_lossy());
//!     Ok(())
//! });
//! let addr = server.start()?;
//! println!("listening on {addr}");
//! # server.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod runtime;
#[cfg(test)]
mod test_util;

use std::{
    fmt,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex, PoisonError},
};

pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::ServerError;
pub use runtime::BackoffConfig;
use runtime::Running;
use tokio::{net::TcpListener, runtime::Handle};

use crate::{
    connection::{Connection, Endpoint},
    dispatch::{Exception, HandlerRegistry, HandlerResult},
    id::IdGenerator,
    packet::Packet,
};

/// Server side of the packet protocol.
pub struct PacketServer {
    config: ServerConfig,
    handlers: Arc<HandlerRegistry>,
    ids: Arc<IdGenerator>,
    running: Mutex<Option<Arc<Running>>>,
}

impl PacketServer {
    /// Create a server that has not started listening yet.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: Arc::default(),
            ids: Arc::new(IdGenerator::new()),
            running: Mutex::new(None),
        }
    }

    /// Use `ids` to assign packet ids instead of a fresh generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Configuration the server was created with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Register a packet handler run for every inbound packet.
    pub fn on_packet<F>(&self, handler: F)
    where
        F: Fn(&Packet) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.add_packet_handler(handler);
    }

    /// Register a handler run when a connection opens.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.add_connect_handler(handler);
    }

    /// Register a handler run once when a connection closes.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.add_disconnect_handler(handler);
    }

    /// Register a handler receiving handler failures and malformed packets.
    pub fn on_exception<F>(&self, handler: F)
    where
        F: Fn(&Exception) + Send + Sync + 'static,
    {
        self.handlers.add_exception_handler(handler);
    }

    /// Bind the configured address and start accepting connections.
    ///
    /// Returns the address actually bound, which differs from the configured
    /// one when the configured port is `0`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] for an unusable configuration,
    /// [`ServerError::AlreadyStarted`] if the server was started before,
    /// [`ServerError::Bind`] if the address cannot be bound, and
    /// [`ServerError::NoRuntime`] outside a Tokio runtime.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        self.config.validate()?;
        Handle::try_current().map_err(ServerError::NoRuntime)?;
        if self.lock_running().is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        let listener = StdTcpListener::bind(self.config.socket_addr()).map_err(ServerError::Bind)?;
        self.start_with_listener(listener)
    }

    /// Start accepting connections on an already bound listener.
    ///
    /// The configured bind address and port are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] for an unusable configuration,
    /// [`ServerError::AlreadyStarted`] if the server was started before,
    /// [`ServerError::Bind`] if the listener cannot be registered with Tokio,
    /// and [`ServerError::NoRuntime`] outside a Tokio runtime.
    pub fn start_with_listener(&self, listener: StdTcpListener) -> Result<SocketAddr, ServerError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(ServerError::NoRuntime)?;
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        let endpoint = Endpoint::start(
            &runtime,
            Arc::clone(&self.handlers),
            Arc::clone(&self.ids),
            self.config.connection_settings(),
            self.config.dispatch_settings(),
        );
        let endpoint_shutdown = endpoint.shutdown.clone();
        let started = Running::spawn(
            listener,
            endpoint,
            self.config.max_connections,
            self.config.backoff,
            &runtime,
        )
        .map_err(|e| {
            endpoint_shutdown.cancel();
            ServerError::Bind(e)
        })?;
        let local_addr = started.local_addr;
        *running = Some(Arc::new(started));
        Ok(local_addr)
    }

    /// Address the server is listening on, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|running| running.local_addr)
    }

    /// Snapshot of the open connections, ordered by connection id.
    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.running()
            .map(|running| running.endpoint.registry.active())
            .unwrap_or_default()
    }

    /// Whether the server has stopped accepting connections.
    ///
    /// A server that was never started reports `true`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.running().is_none_or(|running| !running.is_accepting())
    }

    /// Stop accepting new connections and close the listening socket.
    ///
    /// Open connections keep running until they are closed individually or
    /// by [`PacketServer::shutdown`].
    pub fn close(&self) {
        if let Some(running) = self.running() {
            running.stop_accepting();
        }
    }

    /// Stop accepting, close every open connection and wait for the
    /// server's tasks and in-flight handlers to finish.
    pub async fn shutdown(&self) {
        if let Some(running) = self.running() {
            running.shutdown().await;
        }
    }

    fn running(&self) -> Option<Arc<Running>> { self.lock_running().clone() }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Arc<Running>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PacketServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketServer")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}
