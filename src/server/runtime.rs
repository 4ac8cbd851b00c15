//! Runtime control for [`PacketServer`](super::PacketServer).
//!
//! A running server owns its [`Endpoint`], the token that stops the slots
//! from accepting, and the tracker the slot tasks run on.

mod accept;
mod backoff;

use std::{net::SocketAddr, sync::Arc};

use accept::{AcceptListener, AcceptLoopOptions, SharedListener, accept_loop};
pub use backoff::BackoffConfig;
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::connection::Endpoint;

/// State of a started server.
pub(super) struct Running {
    pub endpoint: Arc<Endpoint>,
    pub local_addr: SocketAddr,
    listener: Arc<SharedListener>,
    accepting: CancellationToken,
    slots: TaskTracker,
}

impl Running {
    /// Spawn `slots` accept loops sharing `listener` on `runtime`.
    pub(super) fn spawn<L>(
        listener: L,
        endpoint: Arc<Endpoint>,
        slots: usize,
        backoff: BackoffConfig,
        runtime: &Handle,
    ) -> std::io::Result<Self>
    where
        L: AcceptListener + 'static,
    {
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(SharedListener::new(Arc::new(listener)));
        let accepting = CancellationToken::new();
        let tracker = TaskTracker::new();
        for _ in 0..slots {
            tracker.spawn_on(
                accept_loop(
                    Arc::clone(&listener),
                    Arc::clone(&endpoint),
                    AcceptLoopOptions {
                        accepting: accepting.clone(),
                        backoff,
                    },
                ),
                runtime,
            );
        }
        tracker.close();
        log::debug!("server accepting: local_addr={local_addr}, slots={slots}");
        Ok(Self {
            endpoint,
            local_addr,
            listener,
            accepting,
            slots: tracker,
        })
    }

    /// Stop accepting new connections and release the listening socket.
    ///
    /// The socket closes as soon as idle slots observe the cancellation.
    /// Open connections are left alone.
    pub(super) fn stop_accepting(&self) {
        self.listener.release();
        self.accepting.cancel();
    }

    pub(super) fn is_accepting(&self) -> bool { !self.accepting.is_cancelled() }

    /// Stop accepting, close every connection and wait for all server tasks.
    pub(super) async fn shutdown(&self) {
        self.stop_accepting();
        self.endpoint.shutdown().await;
        self.slots.wait().await;
        self.endpoint.dispatcher.wait_idle().await;
        tracing::debug!(local_addr = %self.local_addr, "server stopped");
    }
}
