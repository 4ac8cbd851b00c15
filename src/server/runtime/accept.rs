//! Connection slots of the server runtime.
//!
//! Each slot accepts one connection, serves it on the slot task until it
//! closes, then accepts the next. The number of slots therefore bounds the
//! number of connections served at once; pending connections wait in the
//! listener backlog.

use std::{
    io,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures::FutureExt;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;
use crate::{
    connection::{Connection, Endpoint},
    panic::panic_message,
};

/// Abstraction for sources of incoming connections consumed by a slot.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Listener shared by every slot of a server.
///
/// A slot holds a reference only while it waits in `accept()`, never while
/// it serves a connection. Once [`SharedListener::release`] has run and the
/// pending accepts are cancelled, the socket is dropped.
pub(in crate::server) struct SharedListener {
    listener: Mutex<Option<Arc<dyn AcceptListener>>>,
}

impl SharedListener {
    pub(in crate::server) fn new(listener: Arc<dyn AcceptListener>) -> Self {
        Self {
            listener: Mutex::new(Some(listener)),
        }
    }

    fn current(&self) -> Option<Arc<dyn AcceptListener>> { self.lock().clone() }

    /// Drop the server's reference to the listener.
    pub(in crate::server) fn release(&self) { self.lock().take(); }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn AcceptListener>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    /// Cancelled when the server stops accepting.
    pub accepting: CancellationToken,
    pub backoff: BackoffConfig,
}

/// Run one connection slot until `options.accepting` is cancelled or the
/// listener is released.
///
/// Accept failures are logged and retried after an exponential back-off.
/// Cancellation is only observed between connections: a connection being
/// served keeps its slot until it closes.
pub(in crate::server) async fn accept_loop(
    listener: Arc<SharedListener>,
    endpoint: Arc<Endpoint>,
    options: AcceptLoopOptions,
) {
    let AcceptLoopOptions { accepting, backoff } = options;
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) =
        accept_iteration(&listener, &endpoint, &accepting, &backoff, delay).await
    {
        delay = next_delay;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration(
    shared: &SharedListener,
    endpoint: &Arc<Endpoint>,
    accepting: &CancellationToken,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration> {
    let listener = shared.current()?;
    let accepted = select! {
        biased;

        () = accepting.cancelled() => return None,
        res = listener.accept() => res,
    };
    match accepted {
        Ok((stream, peer_addr)) => {
            drop(listener);
            serve(stream, peer_addr, endpoint).await;
            Some(backoff.initial_delay)
        }
        Err(e) => {
            let local_addr = listener.local_addr().ok();
            drop(listener);
            warn!("accept error: error={e:?}, local_addr={local_addr:?}");
            accepting.run_until_cancelled(sleep(delay)).await?;
            Some(backoff.next_delay(delay))
        }
    }
}

/// Serve one accepted stream on the current task until the connection closes.
async fn serve(stream: TcpStream, peer_addr: SocketAddr, endpoint: &Arc<Endpoint>) {
    let (connection, read) = match Connection::open(stream, endpoint) {
        Ok(opened) => opened,
        Err(e) => {
            warn!("connection setup failed: peer_addr={peer_addr}, error={e}");
            return;
        }
    };
    endpoint.dispatcher.dispatch_connect(&connection);
    let read_loop = AssertUnwindSafe(connection.read_frames(read)).catch_unwind();
    if let Err(panic) = read_loop.await {
        let panic_msg = panic_message(panic.as_ref());
        tracing::error!(
            panic = %panic_msg,
            ?peer_addr,
            connection_id = connection.id().as_u64(),
            "connection task panicked"
        );
    }
    // Releases the slot even when the read loop unwound before closing.
    connection.close();
}
