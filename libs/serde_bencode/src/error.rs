//! Error handling types.

use std::sync::Arc;
use std::{fmt, io};

use serde_core::{de, ser};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The input isn't well-formed bencode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{msg} at offset {offset}")]
pub struct SyntaxError {
    msg: String,
    offset: u64,
}

impl SyntaxError {
    pub(crate) fn new(msg: impl Into<String>, offset: u64) -> Self {
        Self {
            msg: msg.into(),
            offset,
        }
    }

    /// Describes what went wrong.
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Index of the offending byte, or the input length if the input ended
    /// too early.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Potential errors to encounter when encoding or decoding bencode.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Another reason provided by the object implementation.
    #[error("{0}")]
    Custom(String),
    /// The error originated from the [`io::Write`] or [`io::Read`]
    /// implementation.
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// The input isn't well-formed bencode.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// The reader was empty before the start of a value.
    #[error("no more values in the stream")]
    EndOfStream,
    /// The value has no bencode representation.
    #[error("type `{0}` is not supported")]
    UnsupportedType(&'static str),
    /// A dictionary key wasn't a string.
    #[error("dictionary keys must be strings")]
    KeyMustBeString,
    /// A dictionary holds the same key twice.
    #[error("duplicate dictionary key `{0}`")]
    DuplicateKey(String),
    /// An integer doesn't fit the target type.
    #[error("integer overflows target type")]
    IntegerOverflow,
    /// Tried to deserialize a [`str`] value but it contained invalid UTF-8.
    #[error("invalid utf-8 in data for string")]
    InvalidUtf8,
    /// The input holds a different kind of value than the target expects.
    #[error("expected {expected} at offset {offset}")]
    Mismatch { expected: &'static str, offset: u64 },
    /// Lists and dictionaries are nested deeper than the decoder allows.
    #[error("recursion limit exceeded at offset {offset}")]
    RecursionLimitExceeded { offset: u64 },
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::Custom(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::Custom(msg.to_string())
    }
}
