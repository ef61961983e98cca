//! The encoded element tree.
//!
//! An [`Element`] knows its full encoded size as soon as it is constructed,
//! so containers can write their header before any of their children.

use std::io;

use arrayvec::ArrayVec;

use crate::error::{Error, Result};
use crate::varint::{self, ElementId};

/// The id and size prefix of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    id: ElementId,
    size: u64,
    bytes: ArrayVec<u8, 12>,
}

impl Head {
    /// Creates a header for an element with the given payload size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if `size` cannot be encoded.
    pub fn new(id: ElementId, size: u64) -> Result<Self> {
        let mut bytes = ArrayVec::new();
        bytes.extend(id.to_bytes());
        bytes.extend(varint::encode_size(size)?);
        Ok(Self { id, size, bytes })
    }

    /// The element id.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The size of the payload following the header.
    pub fn payload_size(&self) -> u64 {
        self.size
    }

    /// The encoded header bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// A node of the encoded element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// A value element holding an encoded scalar.
    Leaf { head: Head, payload: Vec<u8> },
    /// A record element holding child elements.
    Container { head: Head, children: Vec<Self> },
    /// Sibling elements from a repeated field. Has no header of its own.
    Group(Vec<Self>),
    /// A pre-encoded payload provided by a [`Marshal`](crate::Marshal)
    /// implementation.
    Opaque { head: Head, payload: Vec<u8> },
}

impl Element {
    /// Creates a leaf element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the payload is too large.
    pub fn leaf(id: ElementId, payload: Vec<u8>) -> Result<Self> {
        let head = Head::new(id, payload_len(&payload))?;
        Ok(Self::Leaf { head, payload })
    }

    /// Creates an element holding an opaque payload.
    ///
    /// Unlike leaves, these are never omitted from a container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the payload is too large.
    pub fn opaque(id: ElementId, payload: Vec<u8>) -> Result<Self> {
        let head = Head::new(id, payload_len(&payload))?;
        Ok(Self::Opaque { head, payload })
    }

    /// Creates a container element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the combined size of the children is
    /// too large.
    pub fn container(id: ElementId, children: Vec<Self>) -> Result<Self> {
        let size = children
            .iter()
            .try_fold(0u64, |acc, c| acc.checked_add(c.size()))
            .ok_or(Error::SizeOverflow(u64::MAX))?;

        let head = Head::new(id, size)?;
        Ok(Self::Container { head, children })
    }

    /// Creates a group of sibling elements.
    pub fn group(children: Vec<Self>) -> Self {
        Self::Group(children)
    }

    /// Creates a leaf holding an unsigned integer in as few bytes as possible.
    ///
    /// Zero has an empty payload.
    ///
    /// # Errors
    ///
    /// Never fails in practice, but shares the signature of [`Element::leaf`].
    pub fn uint(id: ElementId, value: u64) -> Result<Self> {
        Self::leaf(id, uint_payload(value).to_vec())
    }

    /// Creates a leaf holding a signed integer in as few bytes as possible.
    ///
    /// Zero has an empty payload.
    ///
    /// # Errors
    ///
    /// Never fails in practice, but shares the signature of [`Element::leaf`].
    pub fn int(id: ElementId, value: i64) -> Result<Self> {
        Self::leaf(id, int_payload(value).to_vec())
    }

    /// The element id. Groups have none.
    pub fn id(&self) -> Option<ElementId> {
        match self {
            Self::Leaf { head, .. } | Self::Container { head, .. } | Self::Opaque { head, .. } => {
                Some(head.id)
            },
            Self::Group(_) => None,
        }
    }

    /// The size of the payload, excluding the header.
    ///
    /// For groups, this is the combined size of all members.
    pub fn payload_size(&self) -> u64 {
        match self {
            Self::Leaf { head, .. } | Self::Container { head, .. } | Self::Opaque { head, .. } => {
                head.size
            },
            Self::Group(children) => children.iter().map(Self::size).sum(),
        }
    }

    /// The total encoded size, including the header.
    pub fn size(&self) -> u64 {
        match self {
            Self::Leaf { head, .. } | Self::Container { head, .. } | Self::Opaque { head, .. } => {
                head.bytes.len() as u64 + head.size
            },
            Self::Group(children) => children.iter().map(Self::size).sum(),
        }
    }

    /// Whether this element holds a default value and may be left out of its
    /// container.
    ///
    /// This is true for leaves with an empty payload and groups without
    /// members. Containers and opaque elements are always kept.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Leaf { payload, .. } => payload.is_empty(),
            Self::Group(children) => children.is_empty(),
            Self::Container { .. } | Self::Opaque { .. } => false,
        }
    }

    /// Writes the encoded element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if writing fails.
    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Self::Leaf { head, payload } | Self::Opaque { head, payload } => {
                writer.write_all(&head.bytes)?;
                writer.write_all(payload)?;
            },
            Self::Container { head, children } => {
                writer.write_all(&head.bytes)?;
                for child in children {
                    child.write_to(writer)?;
                }
            },
            Self::Group(children) => {
                for child in children {
                    child.write_to(writer)?;
                }
            },
        }

        Ok(())
    }

    /// Encodes the element into a new [`Vec`].
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(usize::try_from(self.size()).unwrap_or(0));
        self.extend_into(&mut buf);
        buf
    }

    fn extend_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Leaf { head, payload } | Self::Opaque { head, payload } => {
                buf.extend_from_slice(&head.bytes);
                buf.extend_from_slice(payload);
            },
            Self::Container { head, children } => {
                buf.extend_from_slice(&head.bytes);
                for child in children {
                    child.extend_into(buf);
                }
            },
            Self::Group(children) => {
                for child in children {
                    child.extend_into(buf);
                }
            },
        }
    }
}

fn payload_len(payload: &[u8]) -> u64 {
    payload.len() as u64
}

/// Encodes an unsigned integer in the smallest amount of big-endian bytes.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn uint_payload(value: u64) -> ArrayVec<u8, 8> {
    let bytes = value.to_be_bytes();
    let skip = (value.leading_zeros() / 8) as usize;

    let mut buf = ArrayVec::new();
    buf.extend(bytes[skip..].iter().copied());
    buf
}

/// Encodes a signed integer in the smallest amount of two's-complement
/// big-endian bytes that sign-extend back to the same value.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn int_payload(value: i64) -> ArrayVec<u8, 8> {
    let mut buf = ArrayVec::new();
    if value == 0 {
        return buf;
    }

    let redundant = if value < 0 {
        value.leading_ones()
    } else {
        value.leading_zeros()
    };

    // one of the redundant bits has to stay as the sign bit
    let bits = 64 - redundant + 1;
    let len = bits.div_ceil(8) as usize;

    let bytes = value.to_be_bytes();
    buf.extend(bytes[8 - len..].iter().copied());
    buf
}

/// Decodes a big-endian unsigned integer. An empty slice is zero.
///
/// Returns [`None`] if the value does not fit into a [`u64`].
pub(crate) fn read_uint(bytes: &[u8]) -> Option<u64> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    if bytes.len() > 8 {
        return None;
    }

    Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Decodes a big-endian two's-complement integer. An empty slice is zero.
///
/// Returns [`None`] if the value does not fit into an [`i64`].
pub(crate) fn read_int(bytes: &[u8]) -> Option<i64> {
    let Some(&first) = bytes.first() else {
        return Some(0);
    };

    if bytes.len() > 8 {
        return None;
    }

    let init = if first & 0x80 != 0 { -1i64 } else { 0 };
    Some(bytes.iter().fold(init, |acc, &b| (acc << 8) | i64::from(b)))
}
