//! Exposes a deserializer and deserialization helper methods.
//!
//! Elements are read one at a time. Records look up each element's id in
//! their [`Schema`] and skip ids they don't know. Every element's declared
//! size is authoritative: after a field has been decoded, the reader moves on
//! to the end of its element no matter how much of it was consumed.
//!
//! A sequence field collects every element with its id in the container, even
//! when other fields sit between them. Those other elements are stashed in the
//! reader and read after the sequence is complete.

use std::io;
use std::sync::Arc;

use serde::de::value::BorrowedStrDeserializer;
use serde::de::{self, IntoDeserializer as _};

use crate::custom::CUSTOM_TOKEN;
use crate::date::DATE_TOKEN;
use crate::element::{read_int, read_uint};
use crate::error::{Error, Result};
use crate::read::{IoRead, Read, SliceRead};
use crate::schema::{Schema, SchemaCache};
use crate::varint::{self, ElementId, UNKNOWN_SIZE};

/// Deserializes a record from a byte slice.
///
/// The slice is read as a flat sequence of the record's elements until it
/// ends. Use [`element_from_slice`] for a record wrapped in an element.
///
/// # Errors
///
/// Returns [`Error::InvalidTarget`] if `T` isn't a record, and any error
/// encountered while decoding its fields.
pub fn from_slice<'de, T>(buf: &'de [u8]) -> Result<T>
where
    T: de::Deserialize<'de>,
{
    T::deserialize(&mut Deserializer::from_slice(buf))
}

/// Deserializes a record from a [`io::Read`].
///
/// Like [`from_slice`], this reads until the reader is exhausted.
///
/// # Errors
///
/// Same as [`from_slice`], plus [`Error::Io`] if reading fails.
pub fn from_reader<T, R>(reader: R) -> Result<T>
where
    T: de::DeserializeOwned,
    R: io::Read,
{
    T::deserialize(&mut Deserializer::from_reader(reader))
}

/// Deserializes the first element with the given id from a byte slice.
///
/// Other elements before it are skipped.
///
/// # Errors
///
/// Returns [`Error::ElementNotFound`] if the slice has no such element, and
/// any error encountered while decoding the element.
pub fn element_from_slice<'de, T>(id: ElementId, buf: &'de [u8]) -> Result<T>
where
    T: de::Deserialize<'de>,
{
    Deserializer::from_slice(buf).decode_element(id)
}

/// Deserializes the first element with the given id from a [`io::Read`].
///
/// The reader is left right after the element.
///
/// # Errors
///
/// Same as [`element_from_slice`], plus [`Error::Io`] if reading fails.
pub fn element_from_reader<T, R>(id: ElementId, reader: R) -> Result<T>
where
    T: de::DeserializeOwned,
    R: io::Read,
{
    Deserializer::from_reader(reader).decode_element(id)
}

/// The id and size prefix of an element being read.
#[derive(Debug, Clone, Copy)]
struct Head {
    id: ElementId,
    /// May be [`UNKNOWN_SIZE`].
    size: u64,
    /// Offset of the first id byte.
    start: u64,
    /// Offset of the first payload byte.
    data: u64,
    /// The raw id and size bytes.
    raw: [u8; 12],
    raw_len: usize,
}

impl Head {
    fn header(&self) -> &[u8] {
        &self.raw[..self.raw_len]
    }

    /// Where the element ends. Elements of unknown size end with their parent.
    fn end(&self, parent_end: Option<u64>) -> Option<u64> {
        if self.size == UNKNOWN_SIZE {
            parent_end
        } else {
            Some(self.data + self.size)
        }
    }

    fn known_size(&self) -> Result<u64> {
        if self.size == UNKNOWN_SIZE {
            Err(Error::UnknownSize(self.id))
        } else {
            Ok(self.size)
        }
    }
}

/// A [`Deserializer`] for EBML data. The trait is only implemented by
/// `&mut`, and only accepts records at the top level.
///
/// [`Deserializer`]: serde::de::Deserializer
#[derive(Debug)]
pub struct Deserializer<R> {
    reader: R,
    cache: Arc<SchemaCache>,
    zero_fill: bool,
}

impl<'de, R: Read<'de>> Deserializer<R> {
    /// Creates a new deserializer that reads from a [`Read`].
    ///
    /// When reading from a slice, using [`Self::from_slice`] may be clearer.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cache: SchemaCache::global(),
            zero_fill: true,
        }
    }

    /// Uses the given [`SchemaCache`] instead of the global one.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets whether fields without an element are decoded as zero values.
    ///
    /// This is on by default. When off, missing fields are handled like any
    /// serde format would, so `#[serde(default)]` applies and missing fields
    /// without a default are an error.
    #[must_use]
    pub fn zero_fill(mut self, zero_fill: bool) -> Self {
        self.zero_fill = zero_fill;
        self
    }

    /// The amount of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Deserializes the next element with the given id, skipping all other
    /// elements before it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ElementNotFound`] if the input ends first, and any
    /// error encountered while decoding the element.
    pub fn decode_element<T>(&mut self, id: ElementId) -> Result<T>
    where
        T: de::Deserialize<'de>,
    {
        loop {
            let head = self.next_head(None)?.ok_or(Error::ElementNotFound(id))?;
            if head.id != id {
                self.skip_element(&head, None)?;
                continue;
            }

            let value = T::deserialize(ElementDeserializer::new(self, head, None, None))
                .map_err(|e| e.in_element(head.id, Some(head.start)))?;

            self.skip_to(head.end(None))?;
            return Ok(value);
        }
    }

    /// Reads the next element header within `end`.
    ///
    /// Returns [`None`] once `end` is reached. Without an `end`, this also
    /// returns [`None`] if the input ends before the first byte.
    fn next_head(&mut self, end: Option<u64>) -> Result<Option<Head>> {
        let start = self.reader.position();
        if end.is_some_and(|end| start >= end) {
            return Ok(None);
        }

        let Some(lead) = self.reader.next_byte()? else {
            return match end {
                None => Ok(None),
                Some(_) => Err(Error::TruncatedStream { offset: start }),
            };
        };

        let id_len = varint::id_len(lead).ok_or(Error::InvalidIdMarker { offset: start })?;
        let mut raw = [0u8; 12];
        raw[0] = lead;
        self.reader.read_exact(&mut raw[1..id_len])?;
        let id = raw[..id_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        let id = ElementId::new(id)?;

        let size_start = self.reader.position();
        let lead = self
            .reader
            .next_byte()?
            .ok_or(Error::TruncatedStream { offset: size_start })?;
        let len = varint::size_len(lead).ok_or(Error::InvalidSizeMarker { offset: size_start })?;
        let size_raw = &mut raw[id_len..id_len + len];
        size_raw[0] = lead;
        self.reader.read_exact(&mut size_raw[1..])?;
        let size = varint::size_from_raw(size_raw);

        let data = self.reader.position();
        let head = Head {
            id,
            size,
            start,
            data,
            raw,
            raw_len: id_len + len,
        };

        if let Some(end) = end
            && (data > end || (size != UNKNOWN_SIZE && size > end - data))
        {
            return Err(Error::ElementOutOfBounds { id, offset: start });
        }

        Ok(Some(head))
    }

    /// Skips an element the reader doesn't care about.
    fn skip_element(&mut self, head: &Head, parent_end: Option<u64>) -> Result<()> {
        log::trace!(
            "Skipping unknown element {} at offset {} ({} bytes).",
            head.id,
            head.start,
            head.size
        );

        self.skip_to(head.end(parent_end))
    }

    /// Moves the reader to `end`, or to the end of input for [`None`].
    ///
    /// Does nothing if the reader is past `end` already, which is the case
    /// after a sequence stashed the elements that follow it.
    fn skip_to(&mut self, end: Option<u64>) -> Result<()> {
        match end {
            Some(end) => {
                let pos = self.reader.position();
                if pos < end {
                    self.reader.skip(end - pos)?;
                }
                Ok(())
            },
            None => self.reader.skip_rest(),
        }
    }
}

impl<'de> Deserializer<SliceRead<'de>> {
    /// Creates a new deserializer that reads from a slice.
    pub fn from_slice(buf: &'de [u8]) -> Self {
        Self::new(SliceRead::new(buf))
    }

    /// Gets the remaining unread part of the slice.
    pub fn remainder(&self) -> &'de [u8] {
        self.reader.remainder()
    }
}

impl<R: io::Read> Deserializer<IoRead<R>> {
    /// Creates a new deserializer that reads from a [`io::Read`].
    ///
    /// If you're working with a byte slice, it is more efficient to use
    /// [`Deserializer::from_slice`].
    pub fn from_reader(reader: R) -> Self {
        Self::new(IoRead::new(reader))
    }

    /// Gets a reference to the inner reader.
    pub fn as_reader(&mut self) -> &mut R {
        &mut self.reader.inner
    }

    /// Unwraps the deserializer into its inner reader.
    pub fn into_reader(self) -> R {
        self.reader.inner
    }
}

/// Reads values from a [`io::Read`], keeping the first error.
///
/// Once a decode has failed, every later call returns that same error
/// without reading anything.
#[derive(Debug)]
pub struct Decoder<R> {
    de: Deserializer<IoRead<R>>,
    error: Option<Error>,
}

impl<R: io::Read> Decoder<R> {
    /// Creates a new decoder using the global [`SchemaCache`].
    pub fn new(reader: R) -> Self {
        Self::from_deserializer(Deserializer::from_reader(reader))
    }

    /// Creates a new decoder from a configured deserializer.
    pub fn from_deserializer(de: Deserializer<IoRead<R>>) -> Self {
        Self { de, error: None }
    }

    /// Decodes a record from all remaining elements.
    ///
    /// # Errors
    ///
    /// Same as [`from_reader`], or the previous error.
    pub fn decode<T>(&mut self) -> Result<T>
    where
        T: de::DeserializeOwned,
    {
        self.run(|de| T::deserialize(de))
    }

    /// Decodes the next element with the given id.
    ///
    /// # Errors
    ///
    /// Same as [`element_from_reader`], or the previous error.
    pub fn decode_element<T>(&mut self, id: ElementId) -> Result<T>
    where
        T: de::DeserializeOwned,
    {
        self.run(|de| de.decode_element(id))
    }

    /// Gets the error that stopped this decoder, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// The amount of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.de.position()
    }

    /// Unwraps the decoder into its inner reader.
    pub fn into_reader(self) -> R {
        self.de.into_reader()
    }

    fn run<T, F>(&mut self, decode: F) -> Result<T>
    where
        F: FnOnce(&mut Deserializer<IoRead<R>>) -> Result<T>,
    {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let res = decode(&mut self.de);
        if let Err(err) = &res {
            log::debug!("Decoder stopped: {err}");
            self.error = Some(err.clone());
        }

        res
    }
}

macro_rules! invalid_target {
    ($($method:ident)*) => { $(
        fn $method<V>(self, _visitor: V) -> Result<V::Value>
        where
            V: de::Visitor<'de>,
        {
            Err(Error::InvalidTarget)
        }
    )* };
}

// the top level only holds records. everything else needs an element to live in.
impl<'de, R: Read<'de>> de::Deserializer<'de> for &mut Deserializer<R> {
    type Error = Error;

    invalid_target!(
        deserialize_any deserialize_bool
        deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
        deserialize_f32 deserialize_f64 deserialize_char
        deserialize_str deserialize_string deserialize_bytes deserialize_byte_buf
        deserialize_unit deserialize_seq
        deserialize_identifier deserialize_ignored_any
    );

    // flattened records end up here, and they'd need `deserialize_any`
    fn deserialize_map<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("map"))
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::InvalidTarget)
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_tuple<V>(self, _len: usize, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::InvalidTarget)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::InvalidTarget)
    }

    fn deserialize_struct<V>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let schema = self.cache.schema(name, fields)?;
        visitor.visit_map(ContainerAccess::new(self, schema, None))
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::InvalidTarget)
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Hands out the fields of a record as map entries.
struct ContainerAccess<'a, R> {
    de: &'a mut Deserializer<R>,
    schema: Arc<Schema>,
    end: Option<u64>,
    seen: Vec<bool>,
    pending: Pending,
}

enum Pending {
    None,
    Element(Head),
    Zero,
}

impl<'a, 'de, R: Read<'de>> ContainerAccess<'a, R> {
    fn new(de: &'a mut Deserializer<R>, schema: Arc<Schema>, end: Option<u64>) -> Self {
        let seen = vec![false; schema.field_count()];
        Self {
            de,
            schema,
            end,
            seen,
            pending: Pending::None,
        }
    }

    /// Marks the next field without an element as seen and returns its name.
    ///
    /// This includes excluded fields, which never have an element.
    fn next_unseen(&mut self) -> Option<&'static str> {
        let index = self.seen.iter().position(|&s| !s)?;
        self.seen[index] = true;
        self.schema.declared().get(index).copied()
    }
}

impl<'de, R: Read<'de>> de::MapAccess<'de> for ContainerAccess<'_, R> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        while let Some(head) = self.de.next_head(self.end)? {
            let Some(entry) = self.schema.field(head.id) else {
                self.de.skip_element(&head, self.end)?;
                continue;
            };

            self.seen[entry.index] = true;
            self.pending = Pending::Element(head);
            return seed
                .deserialize(BorrowedStrDeserializer::new(entry.name))
                .map(Some);
        }

        if !self.de.zero_fill {
            return Ok(None);
        }

        match self.next_unseen() {
            Some(name) => {
                self.pending = Pending::Zero;
                seed.deserialize(BorrowedStrDeserializer::new(name)).map(Some)
            },
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::Element(head) => {
                let element =
                    ElementDeserializer::new(self.de, head, self.end, Some(&*self.schema));
                let value = seed
                    .deserialize(element)
                    .map_err(|e| e.in_element(head.id, Some(head.start)))?;

                self.de.skip_to(head.end(self.end))?;
                Ok(value)
            },
            Pending::Zero => seed.deserialize(ZeroDeserializer),
            Pending::None => Err(de::Error::custom("value requested before key")),
        }
    }
}

/// Deserializes the payload of a single element.
struct ElementDeserializer<'a, 'p, R> {
    de: &'a mut Deserializer<R>,
    head: Head,
    parent_end: Option<u64>,
    /// The schema of the containing record, used to tell apart unknown
    /// elements inside a repeated field.
    parent: Option<&'p Schema>,
    in_run: bool,
}

impl<'a, 'p, 'de, R: Read<'de>> ElementDeserializer<'a, 'p, R> {
    fn new(
        de: &'a mut Deserializer<R>,
        head: Head,
        parent_end: Option<u64>,
        parent: Option<&'p Schema>,
    ) -> Self {
        Self {
            de,
            head,
            parent_end,
            parent,
            in_run: false,
        }
    }

    fn payload_len(&self) -> Result<usize> {
        let size = self.head.known_size()?;
        usize::try_from(size).map_err(|_| Error::TruncatedStream {
            offset: self.head.data,
        })
    }

    fn read_payload<F, T>(&mut self, access: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        let len = self.payload_len()?;
        self.de.reader.read_byte_view(len, access)
    }

    fn read_uint(&mut self, ty: &'static str) -> Result<u64> {
        self.read_payload(|v| read_uint(v).ok_or_else(|| wide_overflow(v, ty)))
    }

    fn read_int(&mut self, ty: &'static str) -> Result<i64> {
        self.read_payload(|v| read_int(v).ok_or_else(|| wide_overflow(v, ty)))
    }

    fn read_float(&mut self) -> Result<f64> {
        self.read_payload(|v| match *v {
            [] => Ok(0.0),
            [a, b, c, d] => Ok(f32::from_be_bytes([a, b, c, d]).into()),
            [a, b, c, d, e, f, g, h] => Ok(f64::from_be_bytes([a, b, c, d, e, f, g, h])),
            _ => Err(Error::InvalidFloatSize(v.len() as u64)),
        })
    }
}

fn wide_overflow(payload: &[u8], ty: &'static str) -> Error {
    let hex: String = payload.iter().map(|b| format!("{b:02x}")).collect();
    Error::FieldOverflow {
        value: format!("0x{hex}"),
        ty,
    }
}

fn narrow<T, V>(value: V, ty: &'static str) -> Result<T>
where
    T: TryFrom<V>,
    V: ToString + Copy,
{
    T::try_from(value).map_err(|_| Error::FieldOverflow {
        value: value.to_string(),
        ty,
    })
}

macro_rules! deserialize_uint {
    ($($method:ident => $visit:ident($ty:ident),)*) => { $(
        fn $method<V>(mut self, visitor: V) -> Result<V::Value>
        where
            V: de::Visitor<'de>,
        {
            let v = self.read_uint(stringify!($ty))?;
            visitor.$visit(narrow::<$ty, u64>(v, stringify!($ty))?)
        }
    )* };
}

macro_rules! deserialize_int {
    ($($method:ident => $visit:ident($ty:ident),)*) => { $(
        fn $method<V>(mut self, visitor: V) -> Result<V::Value>
        where
            V: de::Visitor<'de>,
        {
            let v = self.read_int(stringify!($ty))?;
            visitor.$visit(narrow::<$ty, i64>(v, stringify!($ty))?)
        }
    )* };
}

impl<'de, R: Read<'de>> de::Deserializer<'de> for ElementDeserializer<'_, '_, R> {
    type Error = Error;

    deserialize_uint!(
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
    );

    deserialize_int!(
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
    );

    fn deserialize_any<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("any"))
    }

    fn deserialize_bool<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("bool"))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn deserialize_f32<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let v = self.read_float()?;
        let narrowed = v as f32;

        // NaN never compares equal, so it passes through as is
        if !v.is_nan() && f64::from(narrowed) != v {
            return Err(Error::FieldOverflow {
                value: v.to_string(),
                ty: "f32",
            });
        }

        visitor.visit_f32(narrowed)
    }

    fn deserialize_f64<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_f64(self.read_float()?)
    }

    fn deserialize_char<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let c = self.read_payload(|v| {
            let s = std::str::from_utf8(v).map_err(|_| Error::InvalidUtf8)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(de::Error::invalid_length(s.chars().count(), &"one char")),
            }
        })?;

        visitor.visit_char(c)
    }

    fn deserialize_str<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let len = self.payload_len()?;
        if let Some(v) = self.de.reader.try_read_bytes_borrow(len) {
            let v = std::str::from_utf8(v?).map_err(|_| Error::InvalidUtf8)?;
            return visitor.visit_borrowed_str(v);
        }

        self.read_payload(|v| {
            let v = std::str::from_utf8(v).map_err(|_| Error::InvalidUtf8)?;
            visitor.visit_str(v)
        })
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let len = self.payload_len()?;
        let v = self.de.reader.read_byte_vec(len)?;
        let v = String::from_utf8(v).map_err(|_| Error::InvalidUtf8)?;
        visitor.visit_string(v)
    }

    fn deserialize_bytes<V>(mut self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let len = self.payload_len()?;
        if let Some(v) = self.de.reader.try_read_bytes_borrow(len) {
            return visitor.visit_borrowed_bytes(v?);
        }

        self.read_payload(|v| visitor.visit_bytes(v))
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let len = self.payload_len()?;
        let v = self.de.reader.read_byte_vec(len)?;
        visitor.visit_byte_buf(v)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        // the caller skips the payload
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V>(self, name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match name {
            DATE_TOKEN => {
                let size = self.head.known_size()?;
                if size != 8 {
                    return Err(Error::InvalidDateSize(size));
                }

                let mut buf = [0u8; 8];
                self.de.reader.read_exact(&mut buf)?;
                visitor.visit_i64(i64::from_be_bytes(buf))
            },
            CUSTOM_TOKEN => self.deserialize_bytes(visitor),
            _ => visitor.visit_newtype_struct(self),
        }
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        if self.in_run {
            return Err(Error::UnsupportedType("nested sequence"));
        }

        visitor.visit_seq(RunAccess {
            de: self.de,
            id: self.head.id,
            first: Some(self.head),
            parent_end: self.parent_end,
            parent: self.parent,
            stash: Vec::new(),
        })
    }

    fn deserialize_tuple<V>(self, _len: usize, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("tuple"))
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("tuple"))
    }

    fn deserialize_map<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("map"))
    }

    fn deserialize_struct<V>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let schema = self.de.cache.schema(name, fields)?;
        let end = self.head.end(self.parent_end);
        visitor.visit_map(ContainerAccess::new(self.de, schema, end))
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("enum"))
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Hands out the sibling elements sharing one id as a sequence.
///
/// Inside a record, this reads up to the end of the record. Elements of other
/// fields are stashed and replayed once the sequence is done, so the record
/// sees them afterwards. Unknown elements are skipped.
///
/// Without a record, the sequence is the run of elements up to the first one
/// with another id.
struct RunAccess<'a, 'p, 'de, R: Read<'de>> {
    de: &'a mut Deserializer<R>,
    id: ElementId,
    first: Option<Head>,
    parent_end: Option<u64>,
    parent: Option<&'p Schema>,
    stash: Vec<R::Stash>,
}

impl<'de, R: Read<'de>> RunAccess<'_, '_, 'de, R> {
    fn next_member(&mut self) -> Result<Option<Head>> {
        if let Some(head) = self.first.take() {
            return Ok(Some(head));
        }

        while let Some(head) = self.de.next_head(self.parent_end)? {
            if head.id == self.id {
                return Ok(Some(head));
            }

            let Some(parent) = self.parent else {
                // hand the element back and end the run
                let len = head.end(self.parent_end).map(|end| end - head.data);
                let stash = self.de.reader.stash(head.start, head.header(), len)?;
                self.de.reader.replay(vec![stash]);
                return Ok(None);
            };

            if parent.field(head.id).is_some() {
                log::trace!(
                    "Stashing element {} at offset {} to collect {}.",
                    head.id,
                    head.start,
                    self.id
                );

                let len = head.end(self.parent_end).map(|end| end - head.data);
                let stash = self.de.reader.stash(head.start, head.header(), len)?;
                self.stash.push(stash);
            } else {
                self.de.skip_element(&head, self.parent_end)?;
            }
        }

        self.de.reader.replay(std::mem::take(&mut self.stash));
        Ok(None)
    }
}

impl<'de, R: Read<'de>> de::SeqAccess<'de> for RunAccess<'_, '_, 'de, R> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        let Some(head) = self.next_member()? else {
            return Ok(None);
        };

        let mut element = ElementDeserializer::new(self.de, head, self.parent_end, self.parent);
        element.in_run = true;

        let value = seed
            .deserialize(element)
            .map_err(|e| e.in_element(head.id, Some(head.start)))?;

        self.de.skip_to(head.end(self.parent_end))?;
        Ok(Some(value))
    }
}

/// Deserializes the zero value of any type, for fields without an element.
struct ZeroDeserializer;

impl<'de> de::Deserializer<'de> for ZeroDeserializer {
    type Error = Error;

    fn deserialize_any<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("any"))
    }

    fn deserialize_bool<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("bool"))
    }

    fn deserialize_i8<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_i8(0)
    }

    fn deserialize_i16<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_i16(0)
    }

    fn deserialize_i32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_i32(0)
    }

    fn deserialize_i64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_i64(0)
    }

    fn deserialize_u8<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_u8(0)
    }

    fn deserialize_u16<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_u16(0)
    }

    fn deserialize_u32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_u32(0)
    }

    fn deserialize_u64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_u64(0)
    }

    fn deserialize_f32<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_f32(0.0)
    }

    fn deserialize_f64<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_f64(0.0)
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_char('\0')
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_str("")
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_string(String::new())
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(&[])
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_byte_buf(Vec::new())
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_none()
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V>(self, name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match name {
            DATE_TOKEN => visitor.visit_i64(0),
            CUSTOM_TOKEN => visitor.visit_borrowed_bytes(&[]),
            _ => visitor.visit_newtype_struct(self),
        }
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_seq(de::value::SeqDeserializer::<_, Error>::new(
            std::iter::empty::<()>(),
        ))
    }

    fn deserialize_tuple<V>(self, _len: usize, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("tuple"))
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("tuple"))
    }

    fn deserialize_map<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("map"))
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(ZeroStructAccess {
            fields: fields.iter(),
        })
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("enum"))
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

/// Fills every field of a nested record with its zero value.
struct ZeroStructAccess {
    fields: std::slice::Iter<'static, &'static str>,
}

impl<'de> de::MapAccess<'de> for ZeroStructAccess {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        self.fields
            .next()
            .map(|&name| seed.deserialize(name.into_deserializer()))
            .transpose()
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(ZeroDeserializer)
    }
}
