//! Exposes a serializer and serialization helper methods.
//!
//! Dictionaries are buffered until all their entries are known, then written
//! with their keys sorted bytewise. Everything else is written as it comes.

use std::io::{self, Write as _};

use serde_core::ser;

use crate::error::{Error, Result};
use crate::raw::RAW_TOKEN;
use crate::scanner;

/// Serializes a value to a [`Vec<u8>`].
///
/// # Errors
///
/// Returns [`Error::UnsupportedType`] for values bencode can't represent,
/// [`Error::KeyMustBeString`] for maps with non-string keys, and
/// [`Error::DuplicateKey`] for maps that produce the same key twice.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: ?Sized + ser::Serialize,
{
    let mut ser = Serializer::from_writer(Vec::new());
    value.serialize(&mut ser)?;
    Ok(ser.into_writer())
}

/// Serializes a value to a [`io::Write`].
///
/// # Errors
///
/// Same as [`to_vec`], plus [`Error::Io`] if writing fails.
pub fn to_writer<W, T>(writer: W, value: &T) -> Result<()>
where
    W: io::Write,
    T: ?Sized + ser::Serialize,
{
    value.serialize(&mut Serializer::from_writer(writer))
}

/// Whether a value equals its type's default.
///
/// Meant for `#[serde(skip_serializing_if = "serde_bencode::is_default")]`,
/// which leaves out zero and empty fields.
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Writes values to a [`io::Write`], keeping the first error.
///
/// Once an encode has failed, every later call returns that same error
/// without writing anything.
#[derive(Debug)]
pub struct Encoder<W> {
    ser: Serializer<W>,
    error: Option<Error>,
}

impl<W: io::Write> Encoder<W> {
    /// Creates a new encoder.
    pub fn new(writer: W) -> Self {
        Self {
            ser: Serializer::from_writer(writer),
            error: None,
        }
    }

    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Same as [`to_writer`], or the previous error.
    pub fn encode<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let res = value.serialize(&mut self.ser);
        if let Err(err) = &res {
            log::debug!("Encoder stopped: {err}");
            self.error = Some(err.clone());
        }

        res
    }

    /// Gets the error that stopped this encoder, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Gets a reference to the inner writer.
    pub fn as_writer(&mut self) -> &mut W {
        self.ser.as_writer()
    }

    /// Unwraps the encoder into its inner writer.
    pub fn into_writer(self) -> W {
        self.ser.into_writer()
    }
}

/// A [`Serializer`] for bencode. The trait is only implemented by `&mut`.
///
/// [`Serializer`]: serde_core::ser::Serializer
#[derive(Debug)]
pub struct Serializer<W> {
    writer: W,
    /// Set while serializing a dictionary value. [`None`] then writes nothing
    /// and the entry is dropped.
    omit_none: bool,
    /// Set while serializing the inner bytes of a [`RawValue`](crate::RawValue).
    raw: bool,
}

impl<W: io::Write> Serializer<W> {
    /// Creates a new serializer that writes to a [`io::Write`].
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer,
            omit_none: false,
            raw: false,
        }
    }

    /// Unwraps the serializer into its inner writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Gets a reference to the inner writer.
    pub fn as_writer(&mut self) -> &mut W {
        &mut self.writer
    }

    fn write_int(&mut self, v: impl std::fmt::Display) -> Result<()> {
        Ok(write!(self.writer, "i{v}e")?)
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        write!(self.writer, "{}:", v.len())?;
        Ok(self.writer.write_all(v)?)
    }
}

impl<'a, W: io::Write> ser::Serializer for &'a mut Serializer<W> {
    type Ok = ();
    type Error = Error;

    type SerializeSeq = SerializeList<'a, W>;
    type SerializeTuple = SerializeList<'a, W>;
    type SerializeTupleStruct = SerializeList<'a, W>;
    type SerializeTupleVariant = ser::Impossible<(), Error>;
    type SerializeMap = SerializeDict<'a, W>;
    type SerializeStruct = SerializeDict<'a, W>;
    type SerializeStructVariant = ser::Impossible<(), Error>;

    fn serialize_bool(self, _v: bool) -> Result<()> {
        Err(Error::UnsupportedType("bool"))
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_i16(self, v: i16) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_i32(self, v: i32) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_i64(self, v: i64) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_i128(self, v: i128) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_u16(self, v: u16) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_u32(self, v: u32) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_u64(self, v: u64) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_u128(self, v: u128) -> Result<()> {
        self.write_int(v)
    }

    fn serialize_f32(self, _v: f32) -> Result<()> {
        Err(Error::UnsupportedType("f32"))
    }

    fn serialize_f64(self, _v: f64) -> Result<()> {
        Err(Error::UnsupportedType("f64"))
    }

    fn serialize_char(self, v: char) -> Result<()> {
        let mut buf = [0u8; 4];
        self.write_bytes(v.encode_utf8(&mut buf).as_bytes())
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        self.write_bytes(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        if self.raw {
            self.raw = false;
            scanner::check_valid(v)?;
            return Ok(self.writer.write_all(v)?);
        }

        self.write_bytes(v)
    }

    fn serialize_none(self) -> Result<()> {
        if self.omit_none {
            Ok(())
        } else {
            Err(Error::UnsupportedType("none outside of a dictionary"))
        }
    }

    fn serialize_some<T>(self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Err(Error::UnsupportedType("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        Err(Error::UnsupportedType("unit"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.write_bytes(variant.as_bytes())
    }

    fn serialize_newtype_struct<T>(self, name: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        if name == RAW_TOKEN {
            self.raw = true;
            let res = value.serialize(&mut *self);
            self.raw = false;
            return res;
        }

        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        Err(Error::UnsupportedType("enum variant with data"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        // list members are never left out
        self.omit_none = false;
        self.writer.write_all(b"l")?;
        Ok(SerializeList(self))
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::UnsupportedType("enum variant with data"))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(SerializeDict {
            ser: self,
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<Self::SerializeStruct> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::UnsupportedType("enum variant with data"))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Allows serializing a sequence of elements as a `list`.
#[doc(hidden)]
pub struct SerializeList<'a, W>(&'a mut Serializer<W>);

impl<W: io::Write> ser::SerializeSeq for SerializeList<'_, W> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(&mut *self.0)
    }

    fn end(self) -> Result<()> {
        Ok(self.0.writer.write_all(b"e")?)
    }
}

impl<W: io::Write> ser::SerializeTuple for SerializeList<'_, W> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<()> {
        ser::SerializeSeq::end(self)
    }
}

impl<W: io::Write> ser::SerializeTupleStruct for SerializeList<'_, W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<()> {
        ser::SerializeSeq::end(self)
    }
}

/// Allows serializing maps and structs as a `dictionary`.
#[doc(hidden)]
pub struct SerializeDict<'a, W> {
    ser: &'a mut Serializer<W>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    key: Option<Vec<u8>>,
}

impl<W> SerializeDict<'_, W> {
    /// Encodes a value on its own. Returns [`None`] if it was left out.
    fn encode_value<T>(value: &T) -> Result<Option<Vec<u8>>>
    where
        T: ?Sized + ser::Serialize,
    {
        let mut ser = Serializer::from_writer(Vec::new());
        ser.omit_none = true;
        value.serialize(&mut ser)?;

        // every encoded value takes at least 2 bytes
        let buf = ser.into_writer();
        Ok((!buf.is_empty()).then_some(buf))
    }

    fn push(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        if let Some(value) = value {
            self.entries.push((key, value));
        }
    }
}

impl<W: io::Write> ser::SerializeMap for SerializeDict<'_, W> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        self.key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| <Error as ser::Error>::custom("value serialized before key"))?;

        let value = Self::encode_value(value)?;
        self.push(key, value);
        Ok(())
    }

    fn end(mut self) -> Result<()> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(pair) = self.entries.windows(2).find(|p| p[0].0 == p[1].0) {
            return Err(Error::DuplicateKey(
                String::from_utf8_lossy(&pair[0].0).into_owned(),
            ));
        }

        let w = &mut self.ser.writer;
        w.write_all(b"d")?;
        for (key, value) in &self.entries {
            write!(w, "{}:", key.len())?;
            w.write_all(key)?;
            w.write_all(value)?;
        }

        Ok(w.write_all(b"e")?)
    }
}

impl<W: io::Write> ser::SerializeStruct for SerializeDict<'_, W> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        let value = Self::encode_value(value)?;
        self.push(key.as_bytes().to_vec(), value);
        Ok(())
    }

    fn end(self) -> Result<()> {
        ser::SerializeMap::end(self)
    }
}

/// Turns dictionary keys into their raw bytes.
struct KeySerializer;

macro_rules! key_must_be_string {
    ($($method:ident($($arg:ty),*),)*) => { $(
        fn $method(self, $(_: $arg),*) -> Result<Vec<u8>> {
            Err(Error::KeyMustBeString)
        }
    )* };
}

impl ser::Serializer for KeySerializer {
    type Ok = Vec<u8>;
    type Error = Error;

    type SerializeSeq = ser::Impossible<Vec<u8>, Error>;
    type SerializeTuple = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleVariant = ser::Impossible<Vec<u8>, Error>;
    type SerializeMap = ser::Impossible<Vec<u8>, Error>;
    type SerializeStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeStructVariant = ser::Impossible<Vec<u8>, Error>;

    key_must_be_string!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_none(),
        serialize_unit(),
        serialize_unit_struct(&'static str),
    );

    fn serialize_char(self, v: char) -> Result<Vec<u8>> {
        Ok(v.to_string().into_bytes())
    }

    fn serialize_str(self, v: &str) -> Result<Vec<u8>> {
        Ok(v.as_bytes().to_vec())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>> {
        Ok(v.to_vec())
    }

    fn serialize_some<T>(self, _value: &T) -> Result<Vec<u8>>
    where
        T: ?Sized + ser::Serialize,
    {
        Err(Error::KeyMustBeString)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Vec<u8>> {
        Ok(variant.as_bytes().to_vec())
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Vec<u8>>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>>
    where
        T: ?Sized + ser::Serialize,
    {
        Err(Error::KeyMustBeString)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(Error::KeyMustBeString)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::KeyMustBeString)
    }
}
