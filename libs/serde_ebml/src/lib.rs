//! # Serde EBML
//!
//! [EBML][ebml] encoding and decoding for serde. EBML is a binary
//! tag-length-value format, best known as the basis of Matroska and WebM.
//!
//! Every element is an id, a size, and a payload. Ids and sizes use a
//! variable-length encoding where the position of the highest set bit in the
//! first byte tells how many bytes follow.
//!
//! Records map their fields to elements by field name: each field is renamed
//! to the hex id of its element. Fields renamed to `"-"` or skipped by serde
//! are left out.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use serde_ebml::ElementId;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct DoDad {
//!     #[serde(rename = "4242")]
//!     do_hickey: u64,
//!     #[serde(rename = "4243")]
//!     thinga_mabob: String,
//!     #[serde(rename = "4244")]
//!     hum_dinger: i64,
//! }
//!
//! let id = ElementId::from_const(0x3F0000);
//! let value = DoDad {
//!     do_hickey: 70000,
//!     thinga_mabob: "huzah".to_owned(),
//!     hum_dinger: -92387,
//! };
//!
//! let bytes = serde_ebml::element_to_vec(id, &value).unwrap();
//! let back: DoDad = serde_ebml::element_from_slice(id, &bytes).unwrap();
//! assert_eq!(value, back);
//! ```
//!
//! Rust types map to payloads as follows:
//!
//! - unsigned integers: big-endian in as few bytes as possible
//! - signed integers: big-endian two's-complement in as few bytes as sign
//!   extension allows
//! - [`f32`], [`f64`]: 4 or 8 byte IEEE 754
//! - [`str`], [`char`], and byte buffers: raw bytes
//! - [`Date`]: 8 byte signed nanoseconds since 2001-01-01
//! - records: the elements of their fields
//! - sequences: one sibling element per member, all with the field's id.
//!   When decoding, members may be mixed with other fields' elements.
//! - [`Option`]: the inner value, or nothing for [`None`]
//! - [`Custom`]: whatever [`Marshal`] produces
//!
//! Fields holding zero, empty strings, empty sequences or [`None`] are left
//! out when encoding. When decoding, fields without an element get their zero
//! value, see [`Deserializer::zero_fill`](de::Deserializer::zero_fill).
//!
//! Byte buffers must go through [`serialize_bytes`](serde::Serializer::serialize_bytes),
//! f.e. with `serde_bytes`. A plain [`Vec<u8>`] is a sequence of single-byte
//! elements.
//!
//! Booleans, maps, tuples, enums, and sequences of sequences are not supported.
//! Neither is `#[serde(flatten)]`, since it is built on maps. Declare the
//! embedded fields on the outer record instead.
//!
//! [ebml]: <https://www.rfc-editor.org/rfc/rfc8794>

use serde::{Deserialize, Serialize};

mod custom;
mod date;
pub mod de;
pub mod element;
mod error;
pub mod read;
pub mod schema;
pub mod ser;
pub mod varint;

#[cfg(test)]
mod tests;

pub use custom::{Custom, Marshal, Unmarshal};
pub use date::Date;
pub use de::{Decoder, Deserializer, element_from_reader, element_from_slice, from_reader, from_slice};
pub use element::Element;
pub use error::{Error, Result};
pub use schema::SchemaCache;
pub use ser::{Encoder, element_to_vec, element_to_writer, encode, to_vec, to_writer};
pub use varint::ElementId;

/// Ids of the standard EBML header elements.
pub mod ids {
    use crate::ElementId;

    /// The EBML header itself.
    pub const EBML: ElementId = ElementId::from_const(0x1A45_DFA3);
    pub const EBML_VERSION: ElementId = ElementId::from_const(0x4286);
    pub const EBML_READ_VERSION: ElementId = ElementId::from_const(0x42F7);
    pub const EBML_MAX_ID_LENGTH: ElementId = ElementId::from_const(0x42F2);
    pub const EBML_MAX_SIZE_LENGTH: ElementId = ElementId::from_const(0x42F3);
    pub const DOC_TYPE: ElementId = ElementId::from_const(0x4282);
    pub const DOC_TYPE_VERSION: ElementId = ElementId::from_const(0x4287);
    pub const DOC_TYPE_READ_VERSION: ElementId = ElementId::from_const(0x4285);
    /// Padding, ignored by readers.
    pub const VOID: ElementId = ElementId::from_const(0xEC);
    pub const CRC32: ElementId = ElementId::from_const(0xBF);
}

/// The header every EBML document starts with, stored in
/// [`ids::EBML`].
///
/// ```
/// use serde_ebml::{Header, ids};
///
/// let header = Header::new("matroska");
/// let bytes = serde_ebml::element_to_vec(ids::EBML, &header).unwrap();
/// assert_eq!(&bytes[..4], [0x1A, 0x45, 0xDF, 0xA3]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "4286")]
    pub version: u32,
    #[serde(rename = "42f7")]
    pub read_version: u32,
    #[serde(rename = "42f2")]
    pub max_id_length: u32,
    #[serde(rename = "42f3")]
    pub max_size_length: u32,
    #[serde(rename = "4282")]
    pub doc_type: String,
    #[serde(rename = "4287")]
    pub doc_type_version: u32,
    #[serde(rename = "4285")]
    pub doc_type_read_version: u32,
}

impl Header {
    /// Creates a version 1 header for the given document type.
    ///
    /// Lengths are set to what this crate can write: 4 byte ids and 8 byte
    /// sizes.
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: doc_type.into(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}
