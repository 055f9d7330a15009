//! CBOR encoding for everything SPHINX puts on the wire or on disk.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt::Display;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod bytes;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SerializationError(pub String);

impl Display for SerializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "serialization error: {}", self.0)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeserializationError(pub String);

impl Display for DeserializationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "deserialization error: {}", self.0)
    }
}

pub fn to_vec<T: Serialize>(val: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(val, &mut bytes)
        .map_err(|e| SerializationError(e.to_string()))?;
    Ok(bytes)
}

pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DeserializationError> {
    ciborium::de::from_reader(bytes).map_err(|e| DeserializationError(e.to_string()))
}

/// Converts the provided integer into a 4 byte array in big-endian (network)
/// byte order or panics if it is too large to fit.
pub fn to_be4<T: TryInto<u32>>(value: T) -> [u8; 4] {
    // `value` may be derived from a secret, so keep it out of the panic
    // message.
    match value.try_into() {
        Ok(value) => value.to_be_bytes(),
        Err(_) => panic!("integer larger than 4 bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn test_round_trip() {
        #[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
        struct Message {
            tag: u8,
            body: Vec<u8>,
        }

        let message = Message {
            tag: 7,
            body: vec![1, 2, 3],
        };
        let encoded = to_vec(&message).unwrap();
        assert_eq!(from_slice::<Message>(&encoded).unwrap(), message);
    }

    #[test]
    fn test_from_slice_rejects_garbage() {
        assert!(from_slice::<u32>(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_to_be4() {
        assert_eq!(to_be4(0u8), [0, 0, 0, 0]);
        assert_eq!(to_be4(0x01234567u32), [0x01, 0x23, 0x45, 0x67]);
        assert_eq!(to_be4(u32::MAX), [0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_to_be4_panics_without_value() {
        assert_eq!(
            *catch_unwind(|| to_be4(1u64 << 32))
                .unwrap_err()
                .downcast::<&str>()
                .unwrap(),
            "integer larger than 4 bytes"
        );
    }
}
