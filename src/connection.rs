//! A live socket shared by the server and client roles.
//!
//! A [`Connection`] owns the outbound queue of one TCP stream and its own list
//! of packet handlers. Its read loop turns inbound frames into packets,
//! retires reply waiters and hands everything to the endpoint's dispatcher.
//!
//! Lifecycle: on open the connection is registered; its owner submits connect
//! handlers before any frame is read. On close (explicit call, EOF or an I/O
//! error, whichever comes first) it is deregistered and disconnect handlers
//! fire exactly once.

mod endpoint;
mod registry;
mod writer;

use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

pub(crate) use endpoint::{ConnectionSettings, DispatchSettings, Endpoint};
use futures::StreamExt;
use log::{Level, debug, log};
pub use registry::ConnectionId;
use thiserror::Error;
use tokio::{
    net::{TcpStream, tcp::OwnedReadHalf},
    select,
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
pub use writer::DRAIN_TIMEOUT;

use crate::{
    codec::PacketCodec,
    correlation::{DuplicateReplyId, ReplyOutcome, ReplyWaiter},
    dispatch::{Exception, HandlerList, HandlerResult, PacketHandler},
    metrics::Direction,
    packet::Packet,
};

/// Deadline used when a reply timeout would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Errors raised when queueing a packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection has closed.
    #[error("connection is closed")]
    Closed,
    /// The outbound queue is at capacity.
    #[error("outbound queue is full")]
    QueueFull,
    /// The encoded packet does not fit the `u32` length prefix.
    #[error("packet of {len} bytes does not fit in a frame")]
    TooLarge {
        /// Encoded packet length.
        len: usize,
    },
    /// A reply waiter for the packet id is already pending.
    #[error(transparent)]
    DuplicateReplyId(#[from] DuplicateReplyId),
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    outbound: mpsc::Sender<Packet>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    packet_handlers: HandlerList<dyn PacketHandler>,
    endpoint: Arc<Endpoint>,
}

/// Handle to an open or closed connection.
///
/// Cloning is cheap; all clones refer to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Non-owning reference to a [`Connection`].
#[derive(Clone, Default)]
pub struct WeakConnection(Weak<ConnectionInner>);

impl WeakConnection {
    /// Upgrade to a [`Connection`] if it still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> { self.0.upgrade().map(Connection::from_inner) }

    pub(crate) fn into_inner(self) -> Weak<ConnectionInner> { self.0 }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakConnection")
            .field(&self.0.upgrade().map(|inner| inner.id))
            .finish()
    }
}

impl Connection {
    /// Register `stream` with `endpoint` and start its writer.
    ///
    /// The caller submits connect handlers with
    /// [`Dispatcher::dispatch_connect`](crate::dispatch::Dispatcher::dispatch_connect)
    /// and then drives inbound frames with [`Connection::read_frames`].
    pub(crate) fn open(
        stream: TcpStream,
        endpoint: &Arc<Endpoint>,
    ) -> io::Result<(Self, OwnedReadHalf)> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read, write) = stream.into_split();
        let settings = endpoint.settings;
        let (outbound, queue) = mpsc::channel(settings.outbound_queue_capacity.max(1));
        let shutdown = endpoint.shutdown.child_token();
        let id = endpoint.registry.allocate_id();

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                local_addr,
                outbound,
                shutdown: shutdown.clone(),
                closed: AtomicBool::new(false),
                packet_handlers: HandlerList::default(),
                endpoint: Arc::clone(endpoint),
            }),
        };
        endpoint.registry.insert(&connection);
        crate::metrics::inc_connections();
        tracing::debug!(connection_id = %id, %peer_addr, "connection opened");

        endpoint.tracker.spawn(
            writer::Writer {
                sink: FramedWrite::new(write, PacketCodec::new(settings.max_packet_body_size)),
                outbound: queue,
                shutdown,
                connection: connection.downgrade(),
                print_errors: settings.print_errors,
            }
            .run(),
        );
        Ok((connection, read))
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self { Self { inner } }

    /// Identifier of this connection within its endpoint.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.inner.id }

    /// Address of the remote peer.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr { self.inner.peer_addr }

    /// Local address of the socket.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.inner.local_addr }

    /// Whether [`Connection::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Resolve once the connection starts closing.
    pub async fn closed(&self) { self.inner.shutdown.cancelled().await; }

    /// Non-owning reference to this connection.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection { WeakConnection(Arc::downgrade(&self.inner)) }

    /// Register a handler for packets arriving on this connection only.
    ///
    /// Connection handlers run after the endpoint's packet handlers.
    pub fn on_packet<F>(&self, handler: F)
    where
        F: Fn(&Packet) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.packet_handlers.push(Arc::new(handler));
    }

    pub(crate) fn packet_handlers(&self) -> &HandlerList<dyn PacketHandler> {
        &self.inner.packet_handlers
    }

    /// Queue `packet` for sending.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] after close, [`SendError::QueueFull`] if
    /// the outbound queue is at capacity, or [`SendError::TooLarge`] if the
    /// packet cannot be framed.
    pub fn send(&self, packet: Packet) -> Result<(), SendError> {
        self.check_sendable(&packet)?;
        self.enqueue(packet)
    }

    /// Queue `packet` expecting a reply within `timeout`.
    ///
    /// An id is assigned to the packet if it has none, and `callback` runs
    /// exactly once with either the reply or [`ReplyOutcome::TimedOut`].
    /// Returns the packet id.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Connection::send`], or
    /// [`SendError::DuplicateReplyId`] if a waiter for the packet id is
    /// still pending. On error `callback` is dropped without running.
    pub fn send_with_reply<F>(
        &self,
        mut packet: Packet,
        timeout: Duration,
        callback: F,
    ) -> Result<i32, SendError>
    where
        F: FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static,
    {
        self.check_sendable(&packet)?;
        let endpoint = &self.inner.endpoint;
        let id = packet.mark_expecting_reply(&endpoint.ids);
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        endpoint.correlator.register(
            id,
            ReplyWaiter::new(deadline, self.id(), callback),
        )?;
        if let Err(e) = self.enqueue(packet) {
            endpoint.correlator.take(id);
            return Err(e);
        }
        Ok(id)
    }

    /// [`Connection::send_with_reply`] using the endpoint's default timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_with_reply`].
    pub fn send_expecting_reply<F>(&self, packet: Packet, callback: F) -> Result<i32, SendError>
    where
        F: FnOnce(ReplyOutcome) -> HandlerResult + Send + 'static,
    {
        let timeout = self.inner.endpoint.settings.default_reply_timeout;
        self.send_with_reply(packet, timeout, callback)
    }

    fn check_sendable(&self, packet: &Packet) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let len = packet.encoded_len();
        if u32::try_from(len).is_err() {
            return Err(SendError::TooLarge { len });
        }
        Ok(())
    }

    fn enqueue(&self, packet: Packet) -> Result<(), SendError> {
        self.inner.outbound.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Close the connection.
    ///
    /// Idempotent. The first call stops the read loop, removes the connection
    /// from its endpoint's registry and then runs the disconnect handlers.
    /// Frames already queued are flushed in the background.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let endpoint = &self.inner.endpoint;
        self.inner.shutdown.cancel();
        endpoint.registry.remove(&self.inner.id);
        crate::metrics::dec_connections();
        tracing::debug!(
            connection_id = %self.inner.id,
            peer_addr = %self.inner.peer_addr,
            "connection closed"
        );
        endpoint.dispatcher.dispatch_disconnect(self);
    }

    /// Read and dispatch frames until the connection closes.
    ///
    /// Frames are handled in arrival order. With blocking handlers every
    /// handler for a frame finishes before the next frame is read.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub(crate) async fn read_frames(&self, read: OwnedReadHalf) {
        let endpoint = &self.inner.endpoint;
        let codec = PacketCodec::new(endpoint.settings.max_packet_body_size);
        let mut frames = FramedRead::new(read, codec);
        loop {
            let next = select! {
                biased;

                () = self.inner.shutdown.cancelled() => break,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(Ok(packet))) => self.handle_packet(packet),
                Some(Ok(Err(source))) => {
                    endpoint.dispatcher.dispatch_exception(Exception::MalformedPacket {
                        connection: self.id(),
                        source,
                    });
                }
                Some(Err(e)) => {
                    let level = if endpoint.settings.print_errors {
                        Level::Warn
                    } else {
                        Level::Debug
                    };
                    log!(
                        level,
                        "connection read failed: connection_id={}, peer_addr={}, error={e}",
                        self.inner.id,
                        self.inner.peer_addr
                    );
                    crate::metrics::inc_errors();
                    break;
                }
                None => {
                    debug!(
                        "peer closed connection: connection_id={}, peer_addr={}",
                        self.inner.id, self.inner.peer_addr
                    );
                    break;
                }
            }
        }
        self.close();
    }

    fn handle_packet(&self, mut packet: Packet) {
        crate::metrics::inc_frames(Direction::Inbound);
        packet.set_source(self.downgrade());
        let endpoint = &self.inner.endpoint;
        if packet.is_reply()
            && let Some(waiter) = endpoint.correlator.take(packet.reply_to())
        {
            endpoint
                .dispatcher
                .dispatch_reply(waiter, ReplyOutcome::Reply(packet.clone()));
        }
        endpoint.dispatcher.dispatch_packet(packet, self);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
