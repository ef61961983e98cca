use std::fmt;

use serde_core::{de, ser};

use crate::error::Result;
use crate::scanner;

pub(crate) const RAW_TOKEN: &str = "$serde_bencode::private::RawValue";

/// An already encoded bencode value.
///
/// Serializing writes the bytes verbatim. Deserializing captures the bytes
/// of the value as they appear in the input, without interpreting them.
///
/// This only round-trips with this crate's serializer and deserializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawValue(Vec<u8>);

impl RawValue {
    /// Wraps bytes holding exactly one bencode value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`](crate::Error::Syntax) if the bytes aren't one
    /// well-formed value.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        scanner::check_valid(&bytes)?;
        Ok(Self(bytes))
    }

    /// Gets the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unwraps the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decodes the held value.
    ///
    /// # Errors
    ///
    /// Same as [`from_slice`](crate::from_slice).
    pub fn decode<'de, T>(&'de self) -> Result<T>
    where
        T: de::Deserialize<'de>,
    {
        crate::from_slice(&self.0)
    }
}

struct Bytes<'a>(&'a [u8]);

impl ser::Serialize for Bytes<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

impl ser::Serialize for RawValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_newtype_struct(RAW_TOKEN, &Bytes(&self.0))
    }
}

impl<'de> de::Deserialize<'de> for RawValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = RawValue;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("raw bencode value")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RawValue(v.to_vec()))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RawValue(v))
            }
        }

        deserializer.deserialize_newtype_struct(RAW_TOKEN, Visitor)
    }
}
