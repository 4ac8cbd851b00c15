//! Client side of the packet protocol.
//!
//! A [`PacketClient`] owns at most one open connection together with its own
//! handlers, reply correlator and id generator. Inbound packets are read on
//! a background task from the moment [`PacketClient::connect`] returns.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tcpacket::{Packet, client::{ClientConfig, PacketClient}};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tcpacket::client::ClientError> {
//! let client = PacketClient::new(ClientConfig::default());
//! client.connect().await?;
//! client.send_with_reply(Packet::with_body("ping"), Duration::from_secs(1), |outcome| {
//!     println!("timed out: {}", outcome.is_timed_out());
//!     Ok(())
//! })?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

pub use config::ClientConfig;
pub use error::ClientError;
use tokio::{
    net::{TcpStream, lookup_host},
    runtime::Handle,
};

use crate::{
    connection::{Connection, Endpoint},
    correlation::ReplyOutcome,
    dispatch::{Exception, HandlerRegistry, HandlerResult},
    id::IdGenerator,
    packet::Packet,
};

/// Open connection and the endpoint serving it.
#[derive(Clone)]
struct Session {
    endpoint: Arc<Endpoint>,
    connection: Connection,
}

/// Client side of the packet protocol.
pub struct PacketClient {
    config: ClientConfig,
    handlers: Arc<HandlerRegistry>,
    ids: Arc<IdGenerator>,
    session: Mutex<Option<Session>>,
}

impl PacketClient {
    /// Create a client that is not connected yet.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            handlers: Arc::default(),
            ids: Arc::new(IdGenerator::new()),
            session: Mutex::new(None),
        }
    }

    /// Use `ids` to assign packet ids instead of a fresh generator.
    #[must_use]
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    /// Configuration the client was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig { &self.config }

    /// Register a packet handler run for every inbound packet.
    pub fn on_packet<F>(&self, handler: F)
    where
        F: Fn(&Packet) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.add_packet_handler(handler);
    }

    /// Register a handler run when the connection opens.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.add_connect_handler(handler);
    }

    /// Register a handler run once when the connection closes.
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

    /// Connect to the configured server and start reading packets.
    ///
    /// Connect handlers run after the connection is stored, so they may use
    /// the client. A client whose previous connection has closed may
    /// connect again.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] for an unusable configuration,
    /// [`ClientError::AlreadyConnected`] while a connection is open,
    /// [`ClientError::Resolve`] if the address resolves to nothing,
    /// [`ClientError::Connect`] if resolution or the TCP connect fails, and
    /// [`ClientError::NoRuntime`] outside a Tokio runtime.
    pub async fn connect(&self) -> Result<Connection, ClientError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(ClientError::NoRuntime)?;
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let stream = self.dial().await?;

        let (endpoint, connection, read) = {
            let mut session = self.lock_session();
            if session.as_ref().is_some_and(|s| !s.connection.is_closed()) {
                return Err(ClientError::AlreadyConnected);
            }
            let endpoint = Endpoint::start(
                &runtime,
                Arc::clone(&self.handlers),
                Arc::clone(&self.ids),
                self.config.connection_settings(),
                self.config.dispatch_settings(),
            );
            let (connection, read) = Connection::open(stream, &endpoint).map_err(|e| {
                endpoint.shutdown.cancel();
                ClientError::Connect(e)
            })?;
            let previous = session.replace(Session {
                endpoint: Arc::clone(&endpoint),
                connection: connection.clone(),
            });
            if let Some(previous) = previous {
                previous.endpoint.shutdown.cancel();
            }
            (endpoint, connection, read)
        };
        tracing::debug!(
            connection_id = %connection.id(),
            peer_addr = %connection.peer_addr(),
            "client connected"
        );

        endpoint.dispatcher.dispatch_connect(&connection);
        let reader = connection.clone();
        let endpoint_shutdown = endpoint.shutdown.clone();
        endpoint.tracker.spawn_on(
            async move {
                reader.read_frames(read).await;
                // The endpoint serves this connection only.
                endpoint_shutdown.cancel();
            },
            &runtime,
        );
        Ok(connection)
    }

    async fn dial(&self) -> Result<TcpStream, ClientError> {
        let target = (self.config.address.as_str(), self.config.port);
        let mut last_error = None;
        for addr in lookup_host(target).await.map_err(ClientError::Connect)? {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    log::debug!("connect attempt failed: addr={addr}, error={e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map_or_else(
            || ClientError::Resolve(format!("{}:{}", self.config.address, self.config.port)),
            ClientError::Connect,
        ))
    }

    /// The current connection, if one was opened. It may have closed since.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.lock_session()
            .as_ref()
            .map(|session| session.connection.clone())
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|session| !session.connection.is_closed())
    }

    /// Queue `packet` on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without an open connection, or
    /// [`ClientError::Send`] if the connection refuses the packet.
    pub fn send(&self, packet: Packet) -> Result<(), ClientError> {
        Ok(self.open_connection()?.send(packet)?)
    }

    /// Queue `packet` expecting a reply within `timeout`; see
    /// [`Connection::send_with_reply`].
    ///
    /// # Errors
    ///
    /// As for [`PacketClient::send`].
    pub fn send_with_reply<F>(
        &self,
        packet: Packet,
        timeout: Duration,
        callback: F,
    ) -> Result<i32, ClientError>
    where
        F: FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static,
    {
        Ok(self
            .open_connection()?
            .send_with_reply(packet, timeout, callback)?)
    }

    /// Queue `packet` expecting a reply within the configured default
    /// timeout.
    ///
    /// # Errors
    ///
    /// As for [`PacketClient::send`].
    pub fn send_expecting_reply<F>(&self, packet: Packet, callback: F) -> Result<i32, ClientError>
    where
        F: FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static,
    {
        Ok(self.open_connection()?.send_expecting_reply(packet, callback)?)
    }

    /// Close the connection and wait for the client's background tasks.
    ///
    /// Pending reply waiters are completed with [`ReplyOutcome::TimedOut`].
    pub async fn close(&self) {
        let session = self.lock_session().clone();
        if let Some(Session {
            endpoint,
            connection,
        }) = session
        {
            connection.close();
            endpoint.shutdown().await;
        }
    }

    fn open_connection(&self) -> Result<Connection, ClientError> {
        self.connection()
            .filter(|connection| !connection.is_closed())
            .ok_or(ClientError::NotConnected)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PacketClient {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().take() {
            session.connection.close();
            session.endpoint.shutdown.cancel();
        }
    }
}

impl fmt::Debug for PacketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketClient")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("connection", &self.connection())
            .finish_non_exhaustive()
    }
}
