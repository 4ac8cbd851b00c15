//! Length-prefixed framing for packets.
//!
//! Every frame is a `u32` big-endian length followed by that many bytes of
//! encoded [`Packet`]. [`PacketCodec`] is an incremental decoder: it accepts
//! input in any chunking, including one byte at a time, and never buffers a
//! frame whose declared length exceeds the configured maximum. Oversized
//! frames are consumed and discarded as they arrive.
//!
//! Malformed payloads are yielded as `Err(MalformedPacket)` items rather than
//! decoder errors so a bad frame does not end a [`FramedRead`] stream.
//!
//! [`FramedRead`]: tokio_util::codec::FramedRead

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use log::debug;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    byte_order::{read_network_u32, write_network_u32},
    packet::Packet,
};

pub mod error;

pub use error::MalformedPacket;

/// Size of the frame length prefix in bytes.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Default upper bound on an accepted frame payload.
pub const DEFAULT_MAX_PACKET_BODY_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    AwaitingLength,
    Reading(usize),
    Skipping(usize),
}

/// Encoder and incremental decoder for length-prefixed packets.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use tcpacket::{codec::PacketCodec, packet::Packet};
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = PacketCodec::new(1024);
/// let mut wire = BytesMut::new();
/// codec
///     .encode(Packet::with_body("Test"), &mut wire)
///     .expect("encode");
///
/// let decoded = codec
///     .decode(&mut wire)
///     .expect("io")
///     .expect("complete frame")
///     .expect("well-formed packet");
/// assert_eq!(decoded.body_str(), Some("Test"));
/// ```
#[derive(Clone, Debug)]
pub struct PacketCodec {
    max_packet_body_size: usize,
    state: DecodeState,
}

impl PacketCodec {
    /// Create a codec that skips frames longer than `max_packet_body_size`.
    #[must_use]
    pub fn new(max_packet_body_size: usize) -> Self {
        Self {
            max_packet_body_size,
            state: DecodeState::AwaitingLength,
        }
    }

    /// Largest frame payload that is decoded rather than skipped.
    #[must_use]
    pub fn max_packet_body_size(&self) -> usize { self.max_packet_body_size }

    /// Whether the decoder sits on a frame boundary.
    #[must_use]
    pub fn is_idle(&self) -> bool { self.state == DecodeState::AwaitingLength }

    fn read_length(&mut self, src: &mut BytesMut) -> bool {
        if src.len() < LENGTH_HEADER_SIZE {
            src.reserve(LENGTH_HEADER_SIZE - src.len());
            return false;
        }
        let declared = read_network_u32([src[0], src[1], src[2], src[3]]);
        src.advance(LENGTH_HEADER_SIZE);
        let len = usize::try_from(declared).unwrap_or(usize::MAX);
        if len > self.max_packet_body_size {
            debug!(
                "skipping oversized frame: len={len}, max={}",
                self.max_packet_body_size
            );
            crate::metrics::inc_frames_skipped();
            self.state = DecodeState::Skipping(len);
        } else {
            // Allocation happens only after the length passed the limit check.
            src.reserve(len.saturating_sub(src.len()));
            self.state = DecodeState::Reading(len);
        }
        true
    }
}

impl Default for PacketCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_PACKET_BODY_SIZE) }
}

impl Decoder for PacketCodec {
    type Item = Result<Packet, MalformedPacket>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::AwaitingLength => {
                    if !self.read_length(src) {
                        return Ok(None);
                    }
                }
                DecodeState::Reading(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    self.state = DecodeState::AwaitingLength;
                    return Ok(Some(Packet::from_bytes(payload)));
                }
                DecodeState::Skipping(remaining) => {
                    let discard = remaining.min(src.len());
                    src.advance(discard);
                    let remaining = remaining - discard;
                    if remaining > 0 {
                        self.state = DecodeState::Skipping(remaining);
                        return Ok(None);
                    }
                    self.state = DecodeState::AwaitingLength;
                }
            }
        }
    }

    /// End of stream is never an error, even in the middle of a frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if !src.is_empty() || !self.is_idle() {
            debug!(
                "stream ended inside a frame: buffered={}, state={:?}",
                src.len(),
                self.state
            );
            src.clear();
            self.state = DecodeState::AwaitingLength;
        }
        Ok(None)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len();
        let prefix = u32::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet of {len} bytes exceeds the u32 length prefix"),
            )
        })?;
        dst.reserve(LENGTH_HEADER_SIZE + len);
        dst.put_slice(&write_network_u32(prefix));
        item.encode_into(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
