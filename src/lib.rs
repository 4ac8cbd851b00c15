#![doc(html_root_url = "https://docs.rs/tcpacket/latest")]
//! Public API for the `tcpacket` library.
//!
//! This crate implements a length-prefixed request/reply packet protocol
//! over TCP. Every frame is a big-endian `u32` length followed by an encoded
//! [`Packet`]: an `i16` type, a one byte reply flag, an optional `i32` id and
//! the body. A [`PacketServer`] serves up to a configured number of
//! connections at once; a [`PacketClient`] owns a single connection. Both
//! route inbound packets to registered handlers, correlate replies with the
//! packets that expect them, and time out waiters that receive no reply.

pub mod body;
pub mod byte_order;
pub mod client;
pub mod codec;
pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod id;
pub mod metrics;
pub mod packet;
pub mod panic;
pub mod server;

pub use body::{BincodeBodyCodec, BodyCodec, BodyError};
pub use client::{ClientConfig, ClientError, PacketClient};
pub use codec::{MalformedPacket, PacketCodec};
pub use connection::{Connection, ConnectionId, SendError, WeakConnection};
pub use correlation::ReplyOutcome;
pub use dispatch::{Exception, HandlerError, HandlerKind, HandlerResult};
pub use id::IdGenerator;
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use packet::{Packet, ReplyError, ReplyState};
pub use server::{PacketServer, ServerConfig, ServerError};
