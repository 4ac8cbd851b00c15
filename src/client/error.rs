//! Error types for [`PacketClient`](super::PacketClient) operations.

use std::io;

use tokio::runtime::TryCurrentError;

use crate::connection::SendError;

/// Errors emitted by [`PacketClient`](super::PacketClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Resolving or connecting to the server failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),
    /// The configured address resolved to no socket address.
    #[error("could not resolve {0}")]
    Resolve(String),
    /// `connect` was called while a connection is open.
    #[error("client is already connected")]
    AlreadyConnected,
    /// The operation needs an open connection.
    #[error("client is not connected")]
    NotConnected,
    /// The configuration cannot be used.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(&'static str),
    /// `connect` was polled outside a Tokio runtime.
    #[error("client must connect inside a Tokio runtime: {0}")]
    NoRuntime(#[source] TryCurrentError),
    /// Queueing a packet on the open connection failed.
    #[error(transparent)]
    Send(#[from] SendError),
}
