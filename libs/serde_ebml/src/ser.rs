//! Exposes a serializer and serialization helper methods.
//!
//! Values are first turned into an [`Element`] tree, which knows all of its
//! sizes, and only then written out. A failed encode never writes partial
//! output.

use std::io;
use std::sync::Arc;

use serde::ser::{self, Impossible, Serialize};

use crate::custom::CUSTOM_TOKEN;
use crate::date::DATE_TOKEN;
use crate::element::{Element, int_payload, uint_payload};
use crate::error::{Error, Result};
use crate::schema::SchemaCache;
use crate::varint::ElementId;

/// Serializes a record to a [`Vec<u8>`].
///
/// The record's fields are written as a flat sequence of elements without an
/// enclosing element. Use [`element_to_vec`] to wrap them.
///
/// # Errors
///
/// Returns [`Error::InvalidTarget`] if the value isn't a record, and any
/// error encountered while encoding the fields.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>>
where
    T: ?Sized + Serialize,
{
    encode_root(&SchemaCache::global(), value).map(|e| e.to_vec())
}

/// Serializes a record to a [`io::Write`].
///
/// Like [`to_vec`], the fields are written without an enclosing element.
///
/// # Errors
///
/// Same as [`to_vec`], plus [`Error::Io`] if writing fails.
pub fn to_writer<W, T>(mut writer: W, value: &T) -> Result<()>
where
    W: io::Write,
    T: ?Sized + Serialize,
{
    encode_root(&SchemaCache::global(), value)?.write_to(&mut writer)
}

/// Serializes a value as a single element to a [`Vec<u8>`].
///
/// # Errors
///
/// Returns any error encountered while encoding the value.
pub fn element_to_vec<T>(id: ElementId, value: &T) -> Result<Vec<u8>>
where
    T: ?Sized + Serialize,
{
    encode(id, value).map(|e| e.to_vec())
}

/// Serializes a value as a single element to a [`io::Write`].
///
/// # Errors
///
/// Same as [`element_to_vec`], plus [`Error::Io`] if writing fails.
pub fn element_to_writer<W, T>(mut writer: W, id: ElementId, value: &T) -> Result<()>
where
    W: io::Write,
    T: ?Sized + Serialize,
{
    encode(id, value)?.write_to(&mut writer)
}

/// Encodes a value as an [`Element`] tree without writing it.
///
/// # Errors
///
/// Returns any error encountered while encoding the value.
pub fn encode<T>(id: ElementId, value: &T) -> Result<Element>
where
    T: ?Sized + Serialize,
{
    value.serialize(Serializer::new(&SchemaCache::global(), Some(id)))
}

fn encode_root<T>(cache: &SchemaCache, value: &T) -> Result<Element>
where
    T: ?Sized + Serialize,
{
    value.serialize(Serializer::new(cache, None))
}

/// Writes values to a [`io::Write`], keeping the first error.
///
/// Once an encode has failed, every later call returns that same error
/// without writing anything.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
    cache: Arc<SchemaCache>,
    error: Option<Error>,
}

impl<W: io::Write> Encoder<W> {
    /// Creates a new encoder using the global [`SchemaCache`].
    pub fn new(writer: W) -> Self {
        Self::with_cache(writer, SchemaCache::global())
    }

    /// Creates a new encoder using the given [`SchemaCache`].
    pub fn with_cache(writer: W, cache: Arc<SchemaCache>) -> Self {
        Self {
            writer,
            cache,
            error: None,
        }
    }

    /// Encodes a record's fields as a flat sequence of elements.
    ///
    /// # Errors
    ///
    /// Same as [`to_writer`], or the previous error.
    pub fn encode<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.run(|cache| encode_root(cache, value))
    }

    /// Encodes a value as a single element.
    ///
    /// # Errors
    ///
    /// Same as [`element_to_writer`], or the previous error.
    pub fn encode_element<T>(&mut self, id: ElementId, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.run(|cache| value.serialize(Serializer::new(cache, Some(id))))
    }

    /// Gets the error that stopped this encoder, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Gets a reference to the inner writer.
    pub fn as_writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwraps the encoder into its inner writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn run<F>(&mut self, build: F) -> Result<()>
    where
        F: FnOnce(&SchemaCache) -> Result<Element>,
    {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let res = build(&self.cache).and_then(|e| e.write_to(&mut self.writer));
        if let Err(err) = &res {
            log::debug!("Encoder stopped: {err}");
            self.error = Some(err.clone());
        }

        res
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Plain,
    Date,
    Opaque,
}

/// A [`Serializer`] that turns a value into an [`Element`].
///
/// Without an id, only records are accepted and their fields are returned as
/// an [`Element::Group`].
///
/// [`Serializer`]: serde::ser::Serializer
#[derive(Debug, Clone, Copy)]
pub struct Serializer<'a> {
    cache: &'a SchemaCache,
    id: Option<ElementId>,
    kind: Kind,
    in_group: bool,
}

impl<'a> Serializer<'a> {
    /// Creates a new serializer for an element with the given id.
    pub fn new(cache: &'a SchemaCache, id: Option<ElementId>) -> Self {
        Self {
            cache,
            id,
            kind: Kind::Plain,
            in_group: false,
        }
    }

    fn id(&self) -> Result<ElementId> {
        self.id.ok_or(Error::InvalidTarget)
    }

    fn leaf(self, payload: &[u8]) -> Result<Element> {
        Element::leaf(self.id()?, payload.to_vec())
    }
}

impl<'a> ser::Serializer for Serializer<'a> {
    type Ok = Element;
    type Error = Error;

    type SerializeSeq = SerializeGroup<'a>;
    type SerializeTuple = Impossible<Element, Error>;
    type SerializeTupleStruct = Impossible<Element, Error>;
    type SerializeTupleVariant = Impossible<Element, Error>;
    type SerializeMap = Impossible<Element, Error>;
    type SerializeStruct = SerializeContainer<'a>;
    type SerializeStructVariant = Impossible<Element, Error>;

    fn serialize_bool(self, _v: bool) -> Result<Element> {
        Err(Error::UnsupportedType("bool"))
    }

    fn serialize_i8(self, v: i8) -> Result<Element> {
        self.serialize_i64(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<Element> {
        self.serialize_i64(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<Element> {
        self.serialize_i64(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<Element> {
        match self.kind {
            Kind::Date => self.leaf(&v.to_be_bytes()),
            _ => self.leaf(&int_payload(v)),
        }
    }

    fn serialize_u8(self, v: u8) -> Result<Element> {
        self.serialize_u64(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<Element> {
        self.serialize_u64(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<Element> {
        self.serialize_u64(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<Element> {
        self.leaf(&uint_payload(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Element> {
        if v.to_bits() == 0 {
            self.leaf(&[])
        } else {
            self.leaf(&v.to_be_bytes())
        }
    }

    fn serialize_f64(self, v: f64) -> Result<Element> {
        if v.to_bits() == 0 {
            self.leaf(&[])
        } else {
            self.leaf(&v.to_be_bytes())
        }
    }

    fn serialize_char(self, v: char) -> Result<Element> {
        self.serialize_str(v.encode_utf8(&mut [0u8; 4]))
    }

    fn serialize_str(self, v: &str) -> Result<Element> {
        self.leaf(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Element> {
        if self.kind != Kind::Opaque {
            return self.leaf(v);
        }

        let (size, payload) = v
            .split_first_chunk::<8>()
            .ok_or(Error::UnsupportedType("bytes"))?;

        let expected = u64::from_be_bytes(*size);
        let actual = payload.len() as u64;
        if expected != actual {
            return Err(Error::MarshalerLength { expected, actual });
        }

        Element::opaque(self.id()?, payload.to_vec())
    }

    fn serialize_none(self) -> Result<Element> {
        self.id()?;
        Ok(Element::group(Vec::new()))
    }

    fn serialize_some<T>(self, value: &T) -> Result<Element>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Element> {
        self.leaf(&[])
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Element> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Element> {
        Err(Error::UnsupportedType("enum"))
    }

    fn serialize_newtype_struct<T>(self, name: &'static str, value: &T) -> Result<Element>
    where
        T: ?Sized + Serialize,
    {
        let kind = match name {
            DATE_TOKEN => Kind::Date,
            CUSTOM_TOKEN => Kind::Opaque,
            _ => self.kind,
        };

        value.serialize(Self { kind, ..self })
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Element>
    where
        T: ?Sized + Serialize,
    {
        Err(Error::UnsupportedType("enum"))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq> {
        if self.in_group {
            return Err(Error::UnsupportedType("nested sequence"));
        }

        self.id()?;
        Ok(SerializeGroup {
            ser: Self {
                in_group: true,
                ..self
            },
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(Error::UnsupportedType("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(Error::UnsupportedType("tuple"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::UnsupportedType("enum"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::UnsupportedType("map"))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<Self::SerializeStruct> {
        Ok(SerializeContainer {
            cache: self.cache,
            id: self.id,
            children: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::UnsupportedType("enum"))
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Collects the members of a repeated field. Every member becomes its own
/// sibling element with the field's id.
pub struct SerializeGroup<'a> {
    ser: Serializer<'a>,
    items: Vec<Element>,
}

impl ser::SerializeSeq for SerializeGroup<'_> {
    type Ok = Element;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        // members are kept even when empty so the count survives
        self.items.push(value.serialize(self.ser)?);
        Ok(())
    }

    fn end(self) -> Result<Element> {
        Ok(Element::group(self.items))
    }
}

/// Collects the fields of a record.
pub struct SerializeContainer<'a> {
    cache: &'a SchemaCache,
    id: Option<ElementId>,
    children: Vec<Element>,
}

impl ser::SerializeStruct for SerializeContainer<'_> {
    type Ok = Element;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        let Some(id) = self.cache.tag(key)? else {
            return Ok(());
        };

        let element = value
            .serialize(Serializer::new(self.cache, Some(id)))
            .map_err(|e| e.in_element(id, None))?;

        if !element.is_empty() {
            self.children.push(element);
        }

        Ok(())
    }

    fn end(self) -> Result<Element> {
        match self.id {
            Some(id) => Element::container(id, self.children),
            None => Ok(Element::group(self.children)),
        }
    }
}
