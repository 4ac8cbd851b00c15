//! Helpers for explicit network byte-order conversions.
//!
//! Every multi-byte field on the wire (the frame length prefix, the packet
//! type and the packet id) is big-endian. These helpers keep the Clippy
//! expectations scoped to the conversion points so protocol code stays
//! explicit about wire endianness.

/// Serialise a `u32` frame length in network byte order.
///
/// # Examples
///
/// ```
/// use tcpacket::byte_order::write_network_u32;
///
/// assert_eq!(write_network_u32(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
/// ```
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` frame length.
///
/// # Examples
///
/// ```
/// use tcpacket::byte_order::read_network_u32;
///
/// assert_eq!(read_network_u32([0x00, 0x00, 0x01, 0x00]), 256);
/// ```
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}

/// Serialise a signed packet type in network byte order.
#[must_use]
pub fn write_network_i16(value: i16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order signed packet type.
///
/// # Examples
///
/// ```
/// use tcpacket::byte_order::read_network_i16;
///
/// assert_eq!(read_network_i16([0xff, 0xfe]), -2);
/// ```
#[must_use]
pub fn read_network_i16(bytes: [u8; 2]) -> i16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    i16::from_be_bytes(bytes)
}

/// Serialise a signed packet id in network byte order.
#[must_use]
pub fn write_network_i32(value: i32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order signed packet id.
///
/// # Examples
///
/// ```
/// use tcpacket::byte_order::read_network_i32;
///
/// assert_eq!(read_network_i32([0x80, 0x00, 0x00, 0x00]), i32::MIN);
/// ```
#[must_use]
pub fn read_network_i32(bytes: [u8; 4]) -> i32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    i32::from_be_bytes(bytes)
}
