//! Facilities shared by every connection of one server or client.

use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::registry::ConnectionRegistry;
use crate::{
    correlation::{ReplyCorrelator, sweep_loop},
    dispatch::{Dispatcher, HandlerRegistry},
    id::IdGenerator,
};

/// Per-connection settings taken from the endpoint configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ConnectionSettings {
    pub max_packet_body_size: usize,
    pub outbound_queue_capacity: usize,
    pub default_reply_timeout: Duration,
    pub print_errors: bool,
}

/// Handler execution settings taken from the endpoint configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DispatchSettings {
    pub blocking_handlers: bool,
    pub handler_pool_size: usize,
    pub reply_sweep_interval: Duration,
}

/// Dispatcher, correlator, id source and registry of one endpoint.
pub(crate) struct Endpoint {
    pub dispatcher: Dispatcher,
    pub correlator: Arc<ReplyCorrelator>,
    pub ids: Arc<IdGenerator>,
    pub registry: ConnectionRegistry,
    pub settings: ConnectionSettings,
    /// Cancelled when the endpoint shuts down; parent of every connection token.
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

impl Endpoint {
    /// Build the endpoint and start its reply sweep on `runtime`.
    pub(crate) fn start(
        runtime: &Handle,
        handlers: Arc<HandlerRegistry>,
        ids: Arc<IdGenerator>,
        settings: ConnectionSettings,
        dispatch: DispatchSettings,
    ) -> Arc<Self> {
        let dispatcher = if dispatch.blocking_handlers {
            Dispatcher::blocking(handlers, settings.print_errors)
        } else {
            Dispatcher::pooled(
                handlers,
                dispatch.handler_pool_size,
                runtime.clone(),
                settings.print_errors,
            )
        };
        let endpoint = Arc::new(Self {
            dispatcher,
            correlator: Arc::new(ReplyCorrelator::new()),
            ids,
            registry: ConnectionRegistry::default(),
            settings,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        endpoint.tracker.spawn_on(
            sweep_loop(
                Arc::clone(&endpoint.correlator),
                endpoint.dispatcher.clone(),
                dispatch.reply_sweep_interval,
                endpoint.shutdown.clone(),
            ),
            runtime,
        );
        endpoint
    }

    /// Close every connection, stop the sweep and wait for endpoint tasks.
    pub(crate) async fn shutdown(&self) {
        for connection in self.registry.active() {
            connection.close();
        }
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.dispatcher.wait_idle().await;
    }
}
