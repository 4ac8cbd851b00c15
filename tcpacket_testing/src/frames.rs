//! Byte-level frame builders.
//!
//! Codec tests and raw-socket tests need exact control over what reaches the
//! decoder, including frames no well-behaved encoder would produce.

use bytes::BytesMut;
use tcpacket::{Packet, PacketCodec, byte_order::write_network_u32};
use tokio_util::codec::Encoder;

/// Length-prefix `payload` without interpreting it.
///
/// # Panics
///
/// Panics if `payload` is longer than `u32::MAX` bytes.
#[must_use]
pub fn raw_frame(payload: &[u8]) -> Vec<u8> {
    let len = u32::try_from(payload.len()).expect("payload fits a u32 length prefix");
    let mut frame = write_network_u32(len).to_vec();
    frame.extend_from_slice(payload);
    frame
}

/// Encode `packets` back to back as they would appear on the wire.
///
/// # Panics
///
/// Panics if a packet cannot be framed.
#[must_use]
pub fn encode_packets<'a>(packets: impl IntoIterator<Item = &'a Packet>) -> BytesMut {
    let mut codec = PacketCodec::default();
    let mut wire = BytesMut::new();
    for packet in packets {
        codec
            .encode(packet.clone(), &mut wire)
            .expect("packet encodes");
    }
    wire
}
