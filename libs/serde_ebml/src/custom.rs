//! Hooks for values that provide their own element payload.

use std::io::{self, Read as _};
use std::marker::PhantomData;
use std::{fmt, ops};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser};

pub(crate) const CUSTOM_TOKEN: &str = "$serde_ebml::private::Custom";

/// Provides the payload of an element directly instead of going through the
/// structural encoding.
///
/// The returned reader must produce at least the declared amount of bytes.
/// Anything past that is ignored.
pub trait Marshal {
    /// Gets the payload size and a reader producing the payload.
    fn marshal(&self) -> (u64, impl io::Read + '_);
}

/// Consumes the payload of an element directly instead of going through the
/// structural decoding.
pub trait Unmarshal {
    /// Gets a sink for a payload of the given size.
    ///
    /// The sink may stop early by accepting zero bytes. Decoding continues
    /// after the element either way.
    fn unmarshal(&mut self, size: u64) -> impl io::Write + '_;
}

/// Routes a value through [`Marshal`] and [`Unmarshal`] when used with this
/// crate's serializer and deserializer.
///
/// Deserializing starts from [`Default::default`] before handing the payload
/// to [`Unmarshal::unmarshal`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Custom<T>(pub T);

impl<T> Custom<T> {
    /// Unwraps the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> ops::Deref for Custom<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> ops::DerefMut for Custom<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T: Marshal> Serialize for Custom<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (size, reader) = self.0.marshal();

        // the payload is passed on prefixed with the declared size, so the
        // serializer can check it after reading
        let capacity = usize::try_from(size).unwrap_or(usize::MAX).min(0x1000);
        let mut buf = Vec::with_capacity(8 + capacity);
        buf.extend_from_slice(&size.to_be_bytes());
        reader
            .take(size)
            .read_to_end(&mut buf)
            .map_err(ser::Error::custom)?;

        serializer.serialize_newtype_struct(CUSTOM_TOKEN, &Marshaled(&buf))
    }
}

struct Marshaled<'a>(&'a [u8]);

impl Serialize for Marshaled<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

impl<'de, T: Unmarshal + Default> Deserialize<'de> for Custom<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor<T>(PhantomData<T>);

        impl<T: Unmarshal + Default> de::Visitor<'_> for Visitor<T> {
            type Value = Custom<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an element payload")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let mut value = T::default();
                feed(value.unmarshal(v.len() as u64), v).map_err(E::custom)?;
                Ok(Custom(value))
            }
        }

        deserializer.deserialize_newtype_struct(CUSTOM_TOKEN, Visitor(PhantomData))
    }
}

/// Writes the payload into the sink until it is done or stops accepting data.
fn feed(mut sink: impl io::Write, mut payload: &[u8]) -> io::Result<()> {
    while !payload.is_empty() {
        match sink.write(payload) {
            Ok(0) => break,
            Ok(n) => payload = &payload[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }

    sink.flush()
}
