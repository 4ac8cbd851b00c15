//! Error types for the packet codec.

use thiserror::Error;

/// A frame whose payload is not a valid packet.
///
/// Malformed packets are local to one frame: the reader reports them and
/// carries on with the next frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedPacket {
    /// The payload ended before a required field.
    #[error("packet truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required for the field being read.
        need: usize,
        /// Bytes that were available.
        have: usize,
    },
    /// The flag byte is not one of the known reply states.
    #[error("unknown packet flag: {0:#04x}")]
    UnknownFlag(u8),
}
