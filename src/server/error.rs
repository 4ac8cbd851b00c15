//! Errors raised by [`PacketServer`](super::PacketServer) operations.

use std::io;

use thiserror::Error;
use tokio::runtime::TryCurrentError;

/// Errors that may occur while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    /// `start` was called on a server that is already running.
    #[error("server already started")]
    AlreadyStarted,
    /// The configuration cannot be used.
    #[error("invalid server configuration: {0}")]
    InvalidConfig(&'static str),
    /// `start` was called outside a Tokio runtime.
    #[error("server must be started inside a Tokio runtime: {0}")]
    NoRuntime(#[source] TryCurrentError),
}
