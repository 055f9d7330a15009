//! Serde helpers that force byte-string encoding for fixed arrays, byte
//! vectors, and Ristretto group elements.
//!
//! Without these, serde encodes `[u8; N]` and `Vec<u8>` as CBOR integer
//! arrays, roughly doubling the wire size. Use as `#[serde(with = "bytes")]`.

extern crate alloc;
use alloc::vec::Vec;
use core::fmt;
use curve25519_dalek::{ristretto::CompressedRistretto, RistrettoPoint, Scalar};

pub fn serialize<Ser, B>(bytes: &B, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
where
    Ser: serde::ser::Serializer,
    B: Bytes,
{
    bytes.serialize(serializer)
}

pub fn deserialize<'de, De, B>(deserializer: De) -> Result<B, De::Error>
where
    De: serde::de::Deserializer<'de>,
    B: Bytes,
{
    B::deserialize(deserializer)
}

pub trait Bytes: Sized {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::ser::Serializer;

    fn deserialize<'de, De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::de::Deserializer<'de>;
}

impl<const N: usize> Bytes for [u8; N] {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::ser::Serializer,
    {
        serializer.serialize_bytes(self)
    }

    fn deserialize<'de, De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::de::Deserializer<'de>,
    {
        struct Visitor<const N: usize>;

        impl<'de, const N: usize> serde::de::Visitor<'de> for Visitor<N> {
            type Value = [u8; N];

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_fmt(format_args!("byte array of length {}", N))
            }

            fn visit_bytes<E>(self, slice: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Self::Value::try_from(slice)
                    .map_err(|_| serde::de::Error::invalid_length(slice.len(), &self))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                // Tolerate the integer-array encoding on input so that
                // messages produced by a plain serde derive still decode.
                let mut buf: Vec<u8> = Vec::with_capacity(N);
                while let Some(x) = seq.next_element()? {
                    buf.push(x);
                }
                self.visit_bytes(&buf)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

impl Bytes for Vec<u8> {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::ser::Serializer,
    {
        serializer.serialize_bytes(self)
    }

    fn deserialize<'de, De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::de::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = Vec<u8>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("Vec<u8>")
            }

            fn visit_bytes<E>(self, slice: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(slice.to_vec())
            }

            fn visit_byte_buf<E>(self, value: Vec<u8>) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(value)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                // The length claimed up front is untrusted. Cap the initial
                // allocation so a truncated input can't make us reserve
                // gigabytes before the decoder notices the stream ended.
                let mut buf: Vec<u8> = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
                while let Some(x) = seq.next_element()? {
                    buf.push(x);
                }
                Ok(buf)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

impl Bytes for Scalar {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::ser::Serializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }

    fn deserialize<'de, De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::de::Deserializer<'de>,
    {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Option::from(Scalar::from_canonical_bytes(bytes)).ok_or(serde::de::Error::invalid_value(
            serde::de::Unexpected::Bytes(&bytes),
            &"a canonical Scalar",
        ))
    }
}

impl Bytes for RistrettoPoint {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::ser::Serializer,
    {
        serializer.serialize_bytes(self.compress().as_bytes())
    }

    fn deserialize<'de, De>(deserializer: De) -> Result<Self, De::Error>
    where
        De: serde::de::Deserializer<'de>,
    {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        CompressedRistretto(bytes)
            .decompress()
            .ok_or(serde::de::Error::invalid_value(
                serde::de::Unexpected::Bytes(&bytes),
                &"a valid RistrettoPoint",
            ))
    }
}
