//! Exposes a deserializer and deserialization helper methods.
//!
//! Values are always parsed from a byte slice. Reading from a [`io::Read`]
//! first collects exactly one value's bytes with a [`Scanner`], so several
//! values may follow each other on one stream.

use std::io;
use std::str::FromStr;

use serde_core::de::value::BorrowedStrDeserializer;
use serde_core::de::{self, IntoDeserializer as _};
use serde_core::forward_to_deserialize_any;

use crate::error::{Error, Result, SyntaxError};
use crate::raw::RAW_TOKEN;
use crate::scanner::{self, Scan, Scanner};

/// Deserializes a value from a byte slice.
///
/// The slice is validated as a whole first, so syntax errors report the
/// offset of the offending byte. Trailing bytes after the value are an error.
///
/// # Errors
///
/// Returns [`Error::Syntax`] for malformed input, and any error encountered
/// while mapping the value onto `T`.
pub fn from_slice<'de, T>(buf: &'de [u8]) -> Result<T>
where
    T: de::Deserialize<'de>,
{
    scanner::check_valid(buf)?;

    let mut de = Deserializer::from_slice(buf);
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Deserializes a single value from a [`io::Read`].
///
/// The reader may still have bytes available when this function returns
/// successfully.
///
/// # Errors
///
/// Same as [`from_slice`], plus [`Error::Io`] if reading fails and
/// [`Error::EndOfStream`] if the reader is empty.
pub fn from_reader<T, R>(reader: R) -> Result<T>
where
    T: de::DeserializeOwned,
    R: io::Read,
{
    Decoder::new(reader).decode()
}

/// A [`Deserializer`] for bencode. The trait is only implemented by `&mut`.
///
/// This doesn't validate the input up front. Malformed input is still
/// rejected, but the reported offsets may be less precise than those of
/// [`from_slice`].
///
/// [`Deserializer`]: serde_core::de::Deserializer
#[derive(Debug)]
pub struct Deserializer<'de> {
    input: &'de [u8],
    pos: usize,
    case_insensitive: bool,
    remaining_depth: usize,
}

impl<'de> Deserializer<'de> {
    /// Creates a new deserializer that reads a value from a slice.
    pub fn from_slice(input: &'de [u8]) -> Self {
        Self {
            input,
            pos: 0,
            case_insensitive: true,
            remaining_depth: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Sets whether dictionary keys may match struct fields ignoring ASCII
    /// case.
    ///
    /// This is on by default. An exact match is always preferred, and among
    /// case-insensitive matches the first declared field wins.
    #[must_use]
    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Sets how deeply lists and dictionaries may nest in typed decoding.
    ///
    /// Defaults to 128. Skipped values don't count towards this.
    #[must_use]
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.remaining_depth = limit;
        self
    }

    /// Gets the remaining unread part of the slice.
    pub fn remainder(&self) -> &'de [u8] {
        self.input.get(self.pos..).unwrap_or_default()
    }

    /// Checks that the whole input was consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] if there are bytes left.
    pub fn end(&self) -> Result<()> {
        if self.remainder().is_empty() {
            Ok(())
        } else {
            Err(syntax("trailing bytes after top-level value", self.pos))
        }
    }

    fn eof(&self) -> Error {
        syntax("unexpected end of bencode input", self.input.len())
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::Mismatch {
            expected,
            offset: self.pos as u64,
        }
    }

    fn peek(&self) -> Result<u8> {
        self.input.get(self.pos).copied().ok_or_else(|| self.eof())
    }

    fn consume(&mut self, c: u8, expected: &'static str) -> Result<()> {
        if self.peek()? == c {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.mismatch(expected))
        }
    }

    /// Finds `c` at or after `from`, returning its index.
    fn find(&self, from: usize, c: u8) -> Result<usize> {
        self.remainder_from(from)
            .iter()
            .position(|&b| b == c)
            .map(|i| from + i)
            .ok_or_else(|| self.eof())
    }

    fn remainder_from(&self, from: usize) -> &'de [u8] {
        self.input.get(from..).unwrap_or_default()
    }

    /// Parses `i<digits>e`, returning the digits.
    fn parse_int_text(&mut self) -> Result<&'de str> {
        if self.peek()? != b'i' {
            return Err(self.mismatch("integer"));
        }

        let start = self.pos + 1;
        let end = self.find(start, b'e')?;
        let digits = &self.input[start..end];

        let body = digits.strip_prefix(b"-").unwrap_or(digits);
        if body.is_empty() || !body.iter().all(u8::is_ascii_digit) {
            return Err(syntax("invalid integer", start));
        }

        self.pos = end + 1;
        std::str::from_utf8(digits).map_err(|_| Error::InvalidUtf8)
    }

    fn parse_int<T: FromStr>(&mut self) -> Result<T> {
        let text = self.parse_int_text()?;
        text.parse().map_err(|_| Error::IntegerOverflow)
    }

    /// Parses `<len>:<bytes>`, returning the bytes.
    fn parse_bytes(&mut self) -> Result<&'de [u8]> {
        if !self.peek()?.is_ascii_digit() {
            return Err(self.mismatch("string"));
        }

        let start = self.pos;
        let colon = self.find(start, b':')?;
        let len: usize = std::str::from_utf8(&self.input[start..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| syntax("invalid string length", start))?;

        let data = colon + 1;
        let end = data
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.eof())?;

        self.pos = end;
        Ok(&self.input[data..end])
    }

    fn parse_str(&mut self) -> Result<&'de str> {
        let v = self.parse_bytes()?;
        std::str::from_utf8(v).map_err(|_| Error::InvalidUtf8)
    }

    /// Moves past the next value without interpreting it.
    ///
    /// Open lists and dictionaries are tracked on the heap, so nesting depth
    /// is only bounded by memory.
    fn skip_value(&mut self) -> Result<()> {
        // true for an open dictionary, false for an open list
        let mut open = Vec::new();
        loop {
            if !open.is_empty() && self.peek()? == b'e' {
                open.pop();
                self.pos += 1;
            } else {
                if open.last() == Some(&true) {
                    self.parse_bytes()?;
                }

                match self.peek()? {
                    b'i' => {
                        self.parse_int_text()?;
                    },
                    b'0'..=b'9' => {
                        self.parse_bytes()?;
                    },
                    b'l' => {
                        self.pos += 1;
                        open.push(false);
                        continue;
                    },
                    b'd' => {
                        self.pos += 1;
                        open.push(true);
                        continue;
                    },
                    _ => {
                        return Err(syntax(
                            "invalid character looking for beginning of value",
                            self.pos,
                        ));
                    },
                }
            }

            if open.is_empty() {
                return Ok(());
            }
        }
    }

    /// Runs `f` one nesting level deeper, failing once the limit is hit.
    fn nested<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let Some(depth) = self.remaining_depth.checked_sub(1) else {
            return Err(Error::RecursionLimitExceeded {
                offset: self.pos as u64,
            });
        };

        self.remaining_depth = depth;

        let res = f(self);
        self.remaining_depth += 1;
        res
    }

    /// Gets the encoded bytes of the next value.
    fn capture_value(&mut self) -> Result<&'de [u8]> {
        let start = self.pos;
        self.skip_value()?;
        Ok(&self.input[start..self.pos])
    }
}

/// Reads values from a [`io::Read`], keeping the first error.
///
/// Each call reads exactly the bytes of one value. Once a decode has failed,
/// every later call returns that same error without reading anything.
///
/// Reads happen a byte at a time, so unbuffered readers should be wrapped in a
/// [`io::BufReader`].
#[derive(Debug)]
pub struct Decoder<R> {
    reader: R,
    scanner: Scanner,
    buf: Vec<u8>,
    case_insensitive: bool,
    error: Option<Error>,
}

impl<R: io::Read> Decoder<R> {
    /// Creates a new decoder.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scanner: Scanner::new(),
            buf: Vec::new(),
            case_insensitive: true,
            error: None,
        }
    }

    /// Same as [`Deserializer::case_insensitive`].
    #[must_use]
    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Decodes the next value.
    ///
    /// Syntax error offsets are relative to the start of that value.
    ///
    /// # Errors
    ///
    /// Same as [`from_reader`], or the previous error.
    pub fn decode<T>(&mut self) -> Result<T>
    where
        T: de::DeserializeOwned,
    {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let res = self.read_value().and_then(|()| {
            let mut de =
                Deserializer::from_slice(&self.buf).case_insensitive(self.case_insensitive);
            T::deserialize(&mut de)
        });

        if let Err(err) = &res {
            log::debug!("Decoder stopped: {err}");
            self.error = Some(err.clone());
        }

        res
    }

    /// Gets the error that stopped this decoder, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Gets a reference to the inner reader.
    pub fn as_reader(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Unwraps the decoder into its inner reader.
    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Fills `buf` with the bytes of exactly one value.
    fn read_value(&mut self) -> Result<()> {
        self.buf.clear();
        self.scanner.reset();

        let mut byte = [0u8];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) if self.buf.is_empty() => return Err(Error::EndOfStream),
                Ok(0) => {
                    self.scanner.eof()?;
                    return Ok(());
                },
                Ok(_) => {
                    self.buf.push(byte[0]);
                    if self.scanner.step(byte[0])? == Scan::End {
                        return Ok(());
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}

const DEFAULT_RECURSION_LIMIT: usize = 128;

fn syntax(msg: &str, offset: usize) -> Error {
    SyntaxError::new(msg, offset as u64).into()
}

macro_rules! deserialize_integer {
    ($($method:ident => $visit:ident($ty:ident),)*) => { $(
        fn $method<V>(self, visitor: V) -> Result<V::Value>
        where
            V: de::Visitor<'de>,
        {
            visitor.$visit(self.parse_int::<$ty>()?)
        }
    )* };
}

impl<'de> de::Deserializer<'de> for &mut Deserializer<'de> {
    type Error = Error;

    deserialize_integer!(
        deserialize_i8 => visit_i8(i8),
        deserialize_i16 => visit_i16(i16),
        deserialize_i32 => visit_i32(i32),
        deserialize_i64 => visit_i64(i64),
        deserialize_i128 => visit_i128(i128),
        deserialize_u8 => visit_u8(u8),
        deserialize_u16 => visit_u16(u16),
        deserialize_u32 => visit_u32(u32),
        deserialize_u64 => visit_u64(u64),
        deserialize_u128 => visit_u128(u128),
    );

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.peek()? {
            b'i' => {
                let text = self.parse_int_text()?;
                if let Ok(v) = text.parse::<i64>() {
                    visitor.visit_i64(v)
                } else if let Ok(v) = text.parse::<u64>() {
                    visitor.visit_u64(v)
                } else {
                    Err(Error::IntegerOverflow)
                }
            },
            b'0'..=b'9' => visitor.visit_borrowed_bytes(self.parse_bytes()?),
            b'l' => self.deserialize_seq(visitor),
            b'd' => self.deserialize_map(visitor),
            _ => Err(syntax("invalid character looking for beginning of value", self.pos)),
        }
    }

    fn deserialize_bool<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("bool"))
    }

    fn deserialize_f32<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("f32"))
    }

    fn deserialize_f64<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("f64"))
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let s = self.parse_str()?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(de::Error::invalid_length(s.chars().count(), &"one char")),
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_str(self.parse_str()?)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.parse_bytes()?)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        // absent values are left out entirely, so anything present is `Some`
        visitor.visit_some(self)
    }

    fn deserialize_unit<V>(self, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("unit"))
    }

    fn deserialize_unit_struct<V>(self, _name: &'static str, _visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        Err(Error::UnsupportedType("unit"))
    }

    fn deserialize_newtype_struct<V>(self, name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        if name == RAW_TOKEN {
            let raw = self.capture_value()?;
            return visitor.visit_borrowed_bytes(raw);
        }

        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.nested(|de| {
            de.consume(b'l', "list")?;
            let value = visitor.visit_seq(ListAccess { de: &mut *de })?;
            de.consume(b'e', "end of list")?;
            Ok(value)
        })
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.nested(|de| {
            de.consume(b'd', "dictionary")?;
            let value = visitor.visit_map(DictAccess {
                de: &mut *de,
                fields: None,
            })?;
            de.consume(b'e', "end of dictionary")?;
            Ok(value)
        })
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
        self.nested(|de| {
            de.consume(b'd', "dictionary")?;
            let value = visitor.visit_map(DictAccess {
                de: &mut *de,
                fields: Some(fields),
            })?;
            de.consume(b'e', "end of dictionary")?;
            Ok(value)
        })
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        // only unit variants, stored as their name
        let variant = self.parse_str()?;
        visitor.visit_enum(variant.into_deserializer())
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
        self.skip_value()?;
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

struct ListAccess<'a, 'de> {
    de: &'a mut Deserializer<'de>,
}

impl<'de> de::SeqAccess<'de> for ListAccess<'_, 'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        if self.de.peek()? == b'e' {
            return Ok(None);
        }

        seed.deserialize(&mut *self.de).map(Some)
    }
}

struct DictAccess<'a, 'de> {
    de: &'a mut Deserializer<'de>,
    /// The declared fields when deserializing a struct.
    fields: Option<&'static [&'static str]>,
}

impl DictAccess<'_, '_> {
    /// Maps a key onto a declared field name.
    ///
    /// An exact match wins, then the first field matching ignoring case.
    fn resolve(&self, key: &[u8]) -> Option<&'static str> {
        let fields = self.fields?;
        if let Some(&field) = fields.iter().find(|f| f.as_bytes() == key) {
            return Some(field);
        }

        if !self.de.case_insensitive {
            return None;
        }

        let field = fields
            .iter()
            .find(|f| f.as_bytes().eq_ignore_ascii_case(key))
            .copied()?;

        log::trace!(
            "Matched key `{}` to field `{field}` ignoring case.",
            String::from_utf8_lossy(key)
        );
        Some(field)
    }
}

impl<'de> de::MapAccess<'de> for DictAccess<'_, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        if self.de.peek()? == b'e' {
            return Ok(None);
        }

        if !self.de.peek()?.is_ascii_digit() {
            return Err(Error::KeyMustBeString);
        }

        let key = self.de.parse_bytes()?;
        match self.resolve(key) {
            Some(field) => seed
                .deserialize(BorrowedStrDeserializer::new(field))
                .map(Some),
            None => seed.deserialize(KeyDeserializer(key)).map(Some),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.de)
    }
}

/// Hands out a dictionary key as a string if possible, otherwise as bytes.
struct KeyDeserializer<'de>(&'de [u8]);

impl<'de> de::Deserializer<'de> for KeyDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match std::str::from_utf8(self.0) {
            Ok(s) => visitor.visit_borrowed_str(s),
            Err(_) => visitor.visit_borrowed_bytes(self.0),
        }
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.0)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_borrowed_bytes(self.0)
    }

    fn deserialize_newtype_struct<V>(self, _name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let variant = std::str::from_utf8(self.0).map_err(|_| Error::InvalidUtf8)?;
        visitor.visit_enum(variant.into_deserializer())
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        option unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize as _;

    use super::*;
    use crate::Value;

    #[test]
    fn skip_and_capture() {
        let mut de = Deserializer::from_slice(b"d1:ai1e1:bl1:xi-2eee3:end");
        let raw = de.capture_value().expect("valid value");
        assert_eq!(raw, b"d1:ai1e1:bl1:xi-2eee", "whole dictionary");
        assert_eq!(de.remainder(), b"3:end", "rest is untouched");
        de.end().expect_err("bytes are left");
    }

    #[test]
    fn skip_checks_dictionary_keys() {
        let mut de = Deserializer::from_slice(b"di1ei2ee");
        let err = de.skip_value().expect_err("integer key");
        assert!(
            matches!(err, Error::Mismatch { expected: "string", offset: 1 }),
            "wrong error: {err:?}"
        );

        let mut de = Deserializer::from_slice(b"d1:ae");
        de.skip_value().expect_err("key without value");
    }

    #[test]
    fn custom_recursion_limit() {
        let mut de = Deserializer::from_slice(b"llleee").recursion_limit(2);
        let err = Value::deserialize(&mut de).expect_err("three levels");
        assert!(
            matches!(err, Error::RecursionLimitExceeded { offset: 2 }),
            "wrong error: {err:?}"
        );

        let mut de = Deserializer::from_slice(b"llleee").recursion_limit(3);
        Value::deserialize(&mut de).expect("three levels fit");
    }

    #[test]
    fn malformed_without_validation() {
        let mut de = Deserializer::from_slice(b"i1x2e");
        let err = de.parse_int::<i32>().expect_err("not a number");
        assert!(matches!(err, Error::Syntax(_)), "wrong error: {err:?}");

        let mut de = Deserializer::from_slice(b"5:abc");
        let err = de.parse_bytes().expect_err("too short");
        assert!(
            matches!(&err, Error::Syntax(e) if e.offset() == 5),
            "wrong error: {err:?}"
        );

        let mut de = Deserializer::from_slice(b"i5e");
        let err = de.parse_bytes().expect_err("not a string");
        assert!(
            matches!(err, Error::Mismatch { expected: "string", offset: 0 }),
            "wrong error: {err:?}"
        );
    }
}
