//! Handler registration and execution.
//!
//! [`HandlerRegistry`] holds the ordered packet, connect, disconnect and
//! exception handler lists of one endpoint. Lists are copy-on-write: adding a
//! handler swaps in a new slice while in-flight dispatches keep iterating the
//! snapshot they took, so no lock is held while a handler runs.
//!
//! [`Dispatcher`] applies the endpoint's execution policy. With blocking
//! handlers every invocation runs inline, in registration order, on the
//! calling task. Otherwise each invocation is submitted independently to a
//! bounded pool of permits, runs on Tokio's blocking threads and may run in
//! any order. Either way a slow handler never occupies an async worker that
//! other connections depend on. Failures and panics are
//! caught at this boundary and routed to the exception handlers under the
//! same policy; failures inside exception handlers are only logged.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::Semaphore,
    task::block_in_place,
};
use tokio_util::task::TaskTracker;

use crate::{
    codec::MalformedPacket,
    connection::{Connection, ConnectionId},
    correlation::{ReplyOutcome, ReplyWaiter},
    packet::Packet,
    panic::panic_message,
};

/// Boxed error returned by failing handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by every user handler.
pub type HandlerResult = Result<(), HandlerError>;

/// Handler invoked for every inbound packet that is not a correlated reply.
pub trait PacketHandler: Fn(&Packet) -> HandlerResult + Send + Sync + 'static {}

impl<F> PacketHandler for F where F: Fn(&Packet) -> HandlerResult + Send + Sync + 'static {}

/// Handler invoked when a connection opens or closes.
pub trait ConnectionHandler: Fn(&Connection) -> HandlerResult + Send + Sync + 'static {}

impl<F> ConnectionHandler for F where F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static {}

/// Handler invoked with every [`Exception`] raised at the dispatch boundary.
pub trait ExceptionHandler: Fn(&Exception) + Send + Sync + 'static {}

impl<F> ExceptionHandler for F where F: Fn(&Exception) + Send + Sync + 'static {}

/// The kind of handler an [`Exception`] originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// A global or connection-local packet handler.
    Packet,
    /// A connect handler.
    Connect,
    /// A disconnect handler.
    Disconnect,
    /// A reply callback.
    Reply,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Packet => "packet",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Reply => "reply",
        })
    }
}

/// A failure reported to exception handlers.
#[derive(Debug, Error)]
pub enum Exception {
    /// A handler returned an error.
    #[error("{kind} handler failed: {source}")]
    Handler {
        /// Handler that failed.
        kind: HandlerKind,
        /// Connection the invocation belonged to.
        connection: Option<ConnectionId>,
        /// Error returned by the handler.
        #[source]
        source: HandlerError,
    },
    /// A handler panicked.
    #[error("{kind} handler panicked: {message}")]
    Panic {
        /// Handler that panicked.
        kind: HandlerKind,
        /// Connection the invocation belonged to.
        connection: Option<ConnectionId>,
        /// Formatted panic payload.
        message: String,
    },
    /// A frame on `connection` did not contain a valid packet.
    #[error("malformed packet on {connection}: {source}")]
    MalformedPacket {
        /// Connection the frame arrived on.
        connection: ConnectionId,
        /// Parse failure.
        #[source]
        source: MalformedPacket,
    },
}

impl Exception {
    /// Connection the exception is associated with, if any.
    #[must_use]
    pub fn connection(&self) -> Option<ConnectionId> {
        match self {
            Self::Handler { connection, .. } | Self::Panic { connection, .. } => *connection,
            Self::MalformedPacket { connection, .. } => Some(*connection),
        }
    }
}

/// Copy-on-write list of handlers.
pub(crate) struct HandlerList<T: ?Sized>(RwLock<Arc<[Arc<T>]>>);

impl<T: ?Sized> HandlerList<T> {
    pub(crate) fn push(&self, handler: Arc<T>) {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Arc<T>> = guard.iter().cloned().collect();
        next.push(handler);
        *guard = next.into();
    }

    pub(crate) fn snapshot(&self) -> Arc<[Arc<T>]> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn len(&self) -> usize { self.snapshot().len() }
}

impl<T: ?Sized> Default for HandlerList<T> {
    fn default() -> Self { Self(RwLock::new(Arc::from(Vec::new()))) }
}

/// Ordered handler collections of one endpoint.
#[derive(Default)]
pub struct HandlerRegistry {
    packet: HandlerList<dyn PacketHandler>,
    connect: HandlerList<dyn ConnectionHandler>,
    disconnect: HandlerList<dyn ConnectionHandler>,
    exception: HandlerList<dyn ExceptionHandler>,
}

impl HandlerRegistry {
    /// Append a packet handler.
    pub fn add_packet_handler<F>(&self, handler: F)
    where
        F: Fn(&Packet) -> HandlerResult + Send + Sync + 'static,
    {
        self.packet.push(Arc::new(handler));
    }

    /// Append a connect handler.
    pub fn add_connect_handler<F>(&self, handler: F)
    where
        F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static,
    {
        self.connect.push(Arc::new(handler));
    }

    /// Append a disconnect handler.
    pub fn add_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(&Connection) -> HandlerResult + Send + Sync + 'static,
    {
        self.disconnect.push(Arc::new(handler));
    }

    /// Append an exception handler.
    pub fn add_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&Exception) + Send + Sync + 'static,
    {
        self.exception.push(Arc::new(handler));
    }

    /// Number of registered packet handlers.
    #[must_use]
    pub fn packet_handler_count(&self) -> usize { self.packet.len() }

    /// Number of registered exception handlers.
    #[must_use]
    pub fn exception_handler_count(&self) -> usize { self.exception.len() }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("packet", &self.packet.len())
            .field("connect", &self.connect.len())
            .field("disconnect", &self.disconnect.len())
            .field("exception", &self.exception.len())
            .finish()
    }
}

#[derive(Clone)]
struct WorkerPool {
    permits: Arc<Semaphore>,
    runtime: Handle,
    tracker: TaskTracker,
}

/// Runs handlers according to an endpoint's execution policy.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    pool: Option<WorkerPool>,
    print_errors: bool,
}

impl Dispatcher {
    /// Dispatcher that runs every handler inline on the calling task.
    #[must_use]
    pub fn blocking(registry: Arc<HandlerRegistry>, print_errors: bool) -> Self {
        Self {
            registry,
            pool: None,
            print_errors,
        }
    }

    /// Dispatcher that runs handlers on `runtime` with at most `pool_size`
    /// invocations in flight.
    #[must_use]
    pub fn pooled(
        registry: Arc<HandlerRegistry>,
        pool_size: usize,
        runtime: Handle,
        print_errors: bool,
    ) -> Self {
        Self {
            registry,
            pool: Some(WorkerPool {
                permits: Arc::new(Semaphore::new(pool_size.max(1))),
                runtime,
                tracker: TaskTracker::new(),
            }),
            print_errors,
        }
    }

    /// Whether handlers run inline.
    #[must_use]
    pub fn is_blocking(&self) -> bool { self.pool.is_none() }

    /// Run global then connection-local packet handlers for `packet`.
    pub fn dispatch_packet(&self, packet: Packet, connection: &Connection) {
        let global = self.registry.packet.snapshot();
        let local = connection.packet_handlers().snapshot();
        if global.is_empty() && local.is_empty() {
            return;
        }
        let packet = Arc::new(packet);
        let id = Some(connection.id());
        for handler in global.iter().chain(local.iter()) {
            let handler = Arc::clone(handler);
            let packet = Arc::clone(&packet);
            self.run(HandlerKind::Packet, id, move || handler(packet.as_ref()));
        }
    }

    /// Run connect handlers for `connection`.
    pub fn dispatch_connect(&self, connection: &Connection) {
        self.dispatch_connection(HandlerKind::Connect, self.registry.connect.snapshot(), connection);
    }

    /// Run disconnect handlers for `connection`.
    pub fn dispatch_disconnect(&self, connection: &Connection) {
        self.dispatch_connection(
            HandlerKind::Disconnect,
            self.registry.disconnect.snapshot(),
            connection,
        );
    }

    fn dispatch_connection(
        &self,
        kind: HandlerKind,
        handlers: Arc<[Arc<dyn ConnectionHandler>]>,
        connection: &Connection,
    ) {
        for handler in handlers.iter() {
            let handler = Arc::clone(handler);
            let connection = connection.clone();
            let id = Some(connection.id());
            self.run(kind, id, move || handler(&connection));
        }
    }

    /// Run the callback of a retired reply waiter.
    pub(crate) fn dispatch_reply(&self, waiter: ReplyWaiter, outcome: ReplyOutcome) {
        let connection = waiter.connection;
        let callback = waiter.into_callback();
        self.run(HandlerKind::Reply, Some(connection), move || callback(outcome));
    }

    /// Report `exception` to the exception handlers.
    ///
    /// Without exception handlers the failure is only logged.
    pub fn dispatch_exception(&self, exception: Exception) {
        let connection_id = exception.connection().map(ConnectionId::as_u64);
        if self.print_errors {
            tracing::error!(?connection_id, error = %exception, "handler exception");
        } else {
            tracing::debug!(?connection_id, error = %exception, "handler exception");
        }
        crate::metrics::inc_errors();

        let handlers = self.registry.exception.snapshot();
        if handlers.is_empty() {
            return;
        }
        let exception = Arc::new(exception);
        for handler in handlers.iter() {
            let handler = Arc::clone(handler);
            let exception = Arc::clone(&exception);
            self.submit(move || {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(exception.as_ref()))) {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(panic = %message, "exception handler panicked");
                }
            });
        }
    }

    fn run<F>(&self, kind: HandlerKind, connection: Option<ConnectionId>, job: F)
    where
        F: FnOnce() -> HandlerResult + Send + 'static,
    {
        let this = self.clone();
        self.submit(move || {
            let exception = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => return,
                Ok(Err(source)) => Exception::Handler {
                    kind,
                    connection,
                    source,
                },
                Err(panic) => Exception::Panic {
                    kind,
                    connection,
                    message: panic_message(panic.as_ref()),
                },
            };
            this.dispatch_exception(exception);
        });
    }

    fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(pool) = &self.pool else {
            run_inline(job);
            return;
        };
        let permits = Arc::clone(&pool.permits);
        let runtime = pool.runtime.clone();
        pool.tracker.spawn_on(
            async move {
                // A closed pool drops pending work.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                // Jobs catch their own panics, so the join only fails on
                // runtime shutdown.
                if let Err(e) = runtime.spawn_blocking(job).await {
                    log::debug!("handler job did not complete: error={e}");
                }
            },
            &pool.runtime,
        );
    }

    /// Wait for every submitted invocation to finish.
    ///
    /// Work submitted while waiting is still awaited.
    pub async fn wait_idle(&self) {
        if let Some(pool) = &self.pool {
            pool.tracker.close();
            pool.tracker.wait().await;
            pool.tracker.reopen();
        }
    }
}

/// Run `job` on the calling thread.
///
/// On a multi-threaded runtime the worker hands its other tasks off first,
/// so a slow handler stalls only the task that dispatched it.
fn run_inline<F: FnOnce()>(job: F) {
    let on_multi_thread = Handle::try_current()
        .is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
    if on_multi_thread {
        block_in_place(job);
    } else {
        job();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field(
                "pool_available",
                &self.pool.as_ref().map(|pool| pool.permits.available_permits()),
            )
            .field("print_errors", &self.print_errors)
            .finish()
    }
}
