//! Typed packet bodies.
//!
//! The protocol core only moves opaque bytes. [`BodyCodec`] is the narrow
//! seam applications use to turn their own message types into packet bodies
//! and back; [`BincodeBodyCodec`] is the default implementation.

use bincode::{Decode, Encode, config, decode_from_slice, encode_to_vec};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while encoding or decoding a packet body.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The value could not be encoded.
    #[error("failed to encode body")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The bytes are not a valid encoding of the requested type.
    #[error("failed to decode body")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Decoding succeeded without consuming the whole body.
    #[error("body has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// Converts application values to and from packet bodies.
///
/// # Object Safety
///
/// This trait is not object-safe; use concrete codec types in API bounds.
pub trait BodyCodec {
    /// Encode `value` into body bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::Encode`] if the value cannot be encoded.
    fn encode<T>(&self, value: &T) -> Result<Bytes, BodyError>
    where
        T: Encode,
        Self: Sized;

    /// Decode a value of type `T` from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::Decode`] if the bytes do not describe a `T`, or
    /// [`BodyError::TrailingBytes`] if bytes remain afterwards.
    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BodyError>
    where
        T: Decode<()>,
        Self: Sized;
}

/// Body codec using `bincode` with its standard configuration.
///
/// # Examples
///
/// ```
/// use tcpacket::{
///     body::{BincodeBodyCodec, BodyCodec},
///     packet::Packet,
/// };
///
/// #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
/// struct Login {
///     user: String,
/// }
///
/// let login = Login {
///     user: "ada".into(),
/// };
/// let packet = Packet::encode_body(1, &BincodeBodyCodec, &login).expect("encode");
/// let decoded: Login = packet.decode_body(&BincodeBodyCodec).expect("decode");
/// assert_eq!(decoded, login);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeBodyCodec;

impl BodyCodec for BincodeBodyCodec {
    fn encode<T>(&self, value: &T) -> Result<Bytes, BodyError>
    where
        T: Encode,
    {
        encode_to_vec(value, config::standard())
            .map(Bytes::from)
            .map_err(|error| BodyError::Encode(Box::new(error)))
    }

    fn decode<T>(&self, bytes: &[u8]) -> Result<T, BodyError>
    where
        T: Decode<()>,
    {
        let (value, consumed) = decode_from_slice(bytes, config::standard())
            .map_err(|error| BodyError::Decode(Box::new(error)))?;
        match bytes.len() - consumed {
            0 => Ok(value),
            trailing => Err(BodyError::TrailingBytes(trailing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use bincode::{Decode, Encode};

    use super::*;

    #[derive(Debug, PartialEq, Encode, Decode)]
    struct Position {
        x: i32,
        y: i32,
        label: String,
    }

    #[test]
    fn truncated_body_fails_to_decode() {
        let bytes = BincodeBodyCodec
            .encode(&Position {
                x: 1,
                y: -1,
                label: "origin".into(),
            })
            .expect("encode");

        let result: Result<Position, _> = BincodeBodyCodec.decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(BodyError::Decode(_))));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = BincodeBodyCodec.encode(&7_u8).expect("encode").to_vec();
        bytes.extend_from_slice(&[0, 0]);

        let result: Result<u8, _> = BincodeBodyCodec.decode(&bytes);
        assert!(matches!(result, Err(BodyError::TrailingBytes(2))));
    }
}
