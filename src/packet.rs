//! The packet model and its wire representation.
//!
//! A [`Packet`] is the unit exchanged between peers. On the wire it is laid
//! out as `[type: i16][flag: u8][id or reply id: i32, optional][body]`, all
//! integers big-endian. The outer `u32` length prefix is handled by
//! [`PacketCodec`](crate::codec::PacketCodec), never here.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    body::{BodyCodec, BodyError},
    byte_order::{read_network_i16, read_network_i32, write_network_i16, write_network_i32},
    codec::MalformedPacket,
    connection::{Connection, SendError, WeakConnection},
    id::{IdGenerator, UNASSIGNED_ID},
};

/// Flag byte for a packet that neither expects nor answers a reply.
pub const FLAG_PLAIN: u8 = 0;
/// Flag byte for a packet that expects a reply; followed by the packet id.
pub const FLAG_EXPECTING_REPLY: u8 = 1;
/// Flag byte for a reply; followed by the id of the packet being answered.
pub const FLAG_REPLY: u8 = 2;

/// Size of the fixed `type` + `flag` header.
pub const HEADER_LEN: usize = 3;
/// Size of the optional id field.
pub const ID_LEN: usize = 4;

/// The request/reply role of a packet.
///
/// A packet is always exactly one of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyState {
    /// Fire-and-forget packet.
    #[default]
    Plain,
    /// The sender waits for a reply correlated by the packet id.
    ExpectingReply,
    /// Answer to the packet whose id is `reply_to`.
    Reply {
        /// Id of the packet being answered.
        reply_to: i32,
    },
}

impl ReplyState {
    fn flag(self) -> u8 {
        match self {
            Self::Plain => FLAG_PLAIN,
            Self::ExpectingReply => FLAG_EXPECTING_REPLY,
            Self::Reply { .. } => FLAG_REPLY,
        }
    }
}

/// Errors raised when answering a packet.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The packet being answered was not sent expecting a reply.
    #[error("packet {packet_id} does not expect a reply")]
    NotExpectingReply {
        /// Id carried by the packet that was answered.
        packet_id: i32,
    },
    /// No destination was given and the packet has no live source connection.
    #[error("packet has no live source connection")]
    NoSource,
    /// The reply could not be queued.
    #[error("failed to send reply: {0}")]
    Send(#[from] SendError),
}

/// A single protocol message.
///
/// Equality ignores the source connection.
///
/// # Examples
///
/// ```
/// use tcpacket::packet::Packet;
///
/// let packet = Packet::new(7, "hello");
/// let decoded = Packet::from_bytes(packet.to_bytes()).expect("valid packet");
/// assert_eq!(decoded, packet);
/// assert_eq!(decoded.body_str(), Some("hello"));
/// ```
#[derive(Clone)]
pub struct Packet {
    packet_type: i16,
    id: i32,
    state: ReplyState,
    body: Bytes,
    source: Option<WeakConnection>,
}

impl Packet {
    /// Create a plain packet with the given type and body.
    #[must_use]
    pub fn new(packet_type: i16, body: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            id: UNASSIGNED_ID,
            state: ReplyState::Plain,
            body: body.into(),
            source: None,
        }
    }

    /// Create a plain packet of type `0` carrying `body`.
    #[must_use]
    pub fn with_body(body: impl Into<Bytes>) -> Self { Self::new(0, body) }

    /// Create a plain packet with an empty body.
    #[must_use]
    pub fn with_type(packet_type: i16) -> Self { Self::new(packet_type, Bytes::new()) }

    /// Create a plain packet whose body is the UTF-8 encoding of `text`.
    #[must_use]
    pub fn from_text(packet_type: i16, text: &str) -> Self {
        Self::new(packet_type, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Encode `value` with `codec` and wrap it in a plain packet.
    ///
    /// # Errors
    ///
    /// Returns a [`BodyError`] if `codec` cannot encode `value`.
    pub fn encode_body<C, T>(packet_type: i16, codec: &C, value: &T) -> Result<Self, BodyError>
    where
        C: BodyCodec,
        T: bincode::Encode,
    {
        Ok(Self::new(packet_type, codec.encode(value)?))
    }

    /// Decode the body with `codec`.
    ///
    /// # Errors
    ///
    /// Returns a [`BodyError`] if the body is not a valid encoding of `T`.
    pub fn decode_body<C, T>(&self, codec: &C) -> Result<T, BodyError>
    where
        C: BodyCodec,
        T: bincode::Decode<()>,
    {
        codec.decode(&self.body)
    }

    /// Application-defined discriminator.
    #[must_use]
    pub fn packet_type(&self) -> i16 { self.packet_type }

    /// Replace the packet type.
    pub fn set_packet_type(&mut self, packet_type: i16) { self.packet_type = packet_type; }

    /// Packet id, or [`UNASSIGNED_ID`] if the packet never expected a reply.
    #[must_use]
    pub fn id(&self) -> i32 { self.id }

    /// Request/reply role of the packet.
    #[must_use]
    pub fn reply_state(&self) -> ReplyState { self.state }

    /// Whether the sender waits for a reply.
    #[must_use]
    pub fn expects_reply(&self) -> bool { self.state == ReplyState::ExpectingReply }

    /// Whether this packet answers another one.
    #[must_use]
    pub fn is_reply(&self) -> bool { matches!(self.state, ReplyState::Reply { .. }) }

    /// Id of the answered packet, or [`UNASSIGNED_ID`] if this is not a reply.
    #[must_use]
    pub fn reply_to(&self) -> i32 {
        match self.state {
            ReplyState::Reply { reply_to } => reply_to,
            _ => UNASSIGNED_ID,
        }
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) { self.body = body.into(); }

    /// Body as UTF-8, or `None` if it is not valid UTF-8.
    #[must_use]
    pub fn body_str(&self) -> Option<&str> { std::str::from_utf8(&self.body).ok() }

    /// Body as UTF-8 with invalid sequences replaced.
    #[must_use]
    pub fn body_lossy(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    /// Connection the packet arrived on, if it is still open.
    #[must_use]
    pub fn source(&self) -> Option<Connection> {
        self.source.as_ref().and_then(WeakConnection::upgrade)
    }

    pub(crate) fn set_source(&mut self, source: WeakConnection) { self.source = Some(source); }

    /// Mark the packet as expecting a reply and return its id.
    ///
    /// An id is drawn from `ids` only the first time; later calls keep it.
    pub fn mark_expecting_reply(&mut self, ids: &IdGenerator) -> i32 {
        if self.id == UNASSIGNED_ID {
            self.id = ids.next_id();
        }
        self.state = ReplyState::ExpectingReply;
        self.id
    }

    /// Mark the packet as the reply to packet `reply_to`.
    pub fn mark_reply_to(&mut self, reply_to: i32) { self.state = ReplyState::Reply { reply_to }; }

    /// Answer this packet on the connection it arrived on.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::NotExpectingReply`] if the sender did not ask for
    /// a reply, [`ReplyError::NoSource`] if the packet has no open source
    /// connection, or [`ReplyError::Send`] if queueing fails. Nothing is sent
    /// on error.
    pub fn reply_with(&self, reply: Packet) -> Result<(), ReplyError> {
        self.check_reply_legal()?;
        let connection = self.source().ok_or(ReplyError::NoSource)?;
        self.send_reply(reply, &connection)
    }

    /// Answer this packet on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyError::NotExpectingReply`] if the sender did not ask for
    /// a reply or [`ReplyError::Send`] if queueing fails.
    pub fn reply_via(&self, reply: Packet, connection: &Connection) -> Result<(), ReplyError> {
        self.check_reply_legal()?;
        self.send_reply(reply, connection)
    }

    fn check_reply_legal(&self) -> Result<(), ReplyError> {
        if self.expects_reply() {
            Ok(())
        } else {
            Err(ReplyError::NotExpectingReply { packet_id: self.id })
        }
    }

    fn send_reply(&self, mut reply: Packet, connection: &Connection) -> Result<(), ReplyError> {
        reply.mark_reply_to(self.id);
        connection.send(reply)?;
        Ok(())
    }

    /// Number of bytes [`Packet::encode_into`] writes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let id_len = match self.state {
            ReplyState::Plain => 0,
            ReplyState::ExpectingReply | ReplyState::Reply { .. } => ID_LEN,
        };
        HEADER_LEN + id_len + self.body.len()
    }

    /// Append the wire form of this packet to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&write_network_i16(self.packet_type));
        dst.put_u8(self.state.flag());
        match self.state {
            ReplyState::Plain => {}
            ReplyState::ExpectingReply => dst.put_slice(&write_network_i32(self.id)),
            ReplyState::Reply { reply_to } => dst.put_slice(&write_network_i32(reply_to)),
        }
        dst.put_slice(&self.body);
    }

    /// Encode this packet into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Parse a packet from its wire form.
    ///
    /// The body shares `src`'s allocation.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPacket`] if `src` is too short for its header or the
    /// flag byte is unknown. No partial packet is produced.
    pub fn from_bytes(mut src: Bytes) -> Result<Self, MalformedPacket> {
        ensure_len(&src, HEADER_LEN)?;
        let header = src.split_to(HEADER_LEN);
        let packet_type = read_network_i16([header[0], header[1]]);
        let (id, state) = match header[2] {
            FLAG_PLAIN => (UNASSIGNED_ID, ReplyState::Plain),
            FLAG_EXPECTING_REPLY => (take_i32(&mut src)?, ReplyState::ExpectingReply),
            FLAG_REPLY => {
                let reply_to = take_i32(&mut src)?;
                (UNASSIGNED_ID, ReplyState::Reply { reply_to })
            }
            other => return Err(MalformedPacket::UnknownFlag(other)),
        };
        Ok(Self {
            packet_type,
            id,
            state,
            body: src,
            source: None,
        })
    }
}

fn ensure_len(src: &Bytes, need: usize) -> Result<(), MalformedPacket> {
    if src.len() < need {
        return Err(MalformedPacket::Truncated {
            need,
            have: src.len(),
        });
    }
    Ok(())
}

fn take_i32(src: &mut Bytes) -> Result<i32, MalformedPacket> {
    ensure_len(src, ID_LEN)?;
    let raw = src.split_to(ID_LEN);
    Ok(read_network_i32([raw[0], raw[1], raw[2], raw[3]]))
}

impl Default for Packet {
    fn default() -> Self { Self::with_type(0) }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_type == other.packet_type
            && self.id == other.id
            && self.state == other.state
            && self.body == other.body
    }
}

impl Eq for Packet {}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("packet_type", &self.packet_type)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("body_len", &self.body.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests;
