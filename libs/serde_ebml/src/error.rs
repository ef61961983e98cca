//! Error handling types.
//!
//! Like the serde docs suggest, the encoder and decoder share one error type.
//! It is [`Clone`] so [`Encoder`](crate::Encoder) and
//! [`Decoder`](crate::Decoder) can hand out the same error again after a
//! failure.

use std::sync::Arc;
use std::{fmt, io};

use serde::{de, ser};

use crate::varint::ElementId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Potential errors to encounter when encoding or decoding EBML data.
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

    /// An element id is larger than the 4-byte class allows.
    #[error("element id {0:#x} overflows the 4-byte id class")]
    IdOverflow(u32),
    /// An element id's leading byte does not carry the class marker matching
    /// its byte length.
    #[error("element id {0:#x} has no valid class marker")]
    InvalidId(u32),
    /// While decoding, an element id started with a byte below `0x10`.
    #[error("invalid element id marker at offset {offset}")]
    InvalidIdMarker { offset: u64 },
    /// An element size is larger than the 8-byte size class allows.
    #[error("element size {0} overflows the 8-byte size class")]
    SizeOverflow(u64),
    /// While decoding, an element size started with a zero byte.
    #[error("invalid element size marker at offset {offset}")]
    InvalidSizeMarker { offset: u64 },
    /// A field name could not be parsed as a hexadecimal element id.
    #[error("malformed element id tag `{0}`")]
    MalformedTag(String),

    /// The value has no EBML representation.
    #[error("values of type {0} cannot be represented in EBML")]
    UnsupportedType(&'static str),
    /// The top-level value must be a struct.
    #[error("the top-level value must be a struct")]
    InvalidTarget,
    /// A [`Marshal`](crate::Marshal) implementation produced less data than it
    /// declared.
    #[error("marshaler declared {expected} bytes but produced {actual}")]
    MarshalerLength { expected: u64, actual: u64 },

    /// The input ended in the middle of an element.
    #[error("truncated stream at offset {offset}")]
    TruncatedStream { offset: u64 },
    /// An element declared a size reaching past the end of its parent.
    #[error("element {id} at offset {offset} reaches past the end of its parent")]
    ElementOutOfBounds { id: ElementId, offset: u64 },
    /// A leaf element declared an unknown size.
    #[error("element {0} has unknown size but is not a container")]
    UnknownSize(ElementId),
    /// A float element was neither 4 nor 8 bytes long.
    #[error("float elements must be 4 or 8 bytes, got {0}")]
    InvalidFloatSize(u64),
    /// A date element was not 8 bytes long.
    #[error("date elements must be 8 bytes, got {0}")]
    InvalidDateSize(u64),
    /// The encoded integer does not fit the field it is decoded into.
    #[error("value {value} overflows field of type {ty}")]
    FieldOverflow { value: String, ty: &'static str },
    /// Tried to decode a string that contained invalid UTF-8.
    #[error("invalid utf-8 in data for string")]
    InvalidUtf8,
    /// The input ended before an element with the requested id was found.
    #[error("no element with id {0} found")]
    ElementNotFound(ElementId),

    /// Wraps an error with the element it occurred in.
    #[error("element {id}{}: {source}", OffsetDisplay(*offset))]
    Element {
        id: ElementId,
        offset: Option<u64>,
        source: Box<Self>,
    },
}

impl Error {
    /// Gets the error without any [`Error::Element`] context.
    pub fn innermost(&self) -> &Self {
        let mut this = self;
        while let Self::Element { source, .. } = this {
            this = source;
        }
        this
    }

    /// Attaches element context, unless the error already names an element.
    pub(crate) fn in_element(self, id: ElementId, offset: Option<u64>) -> Self {
        match self {
            Self::Element { .. } => self,
            _ => Self::Element {
                id,
                offset,
                source: Box::new(self),
            },
        }
    }
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

struct OffsetDisplay(Option<u64>);

impl fmt::Display for OffsetDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(offset) => write!(f, " at offset {offset}"),
            None => Ok(()),
        }
    }
}
