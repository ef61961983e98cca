//! # Serde Bencode
//!
//! [Bencode][bencode] encoding and decoding for serde. Bencode is the format
//! BitTorrent uses for torrent files and tracker messages.
//!
//! It knows four kinds of value:
//!
//! - integers: `i42e`
//! - byte strings: `5:hello`
//! - lists: `l` followed by values, then `e`
//! - dictionaries: `d` followed by string keys and values, then `e`
//!
//! Rust types map to these as follows:
//!
//! - integers: all integer types
//! - byte strings: [`str`], [`char`], byte buffers, and unit enum variants
//! - lists: sequences, tuples, and tuple structs
//! - dictionaries: maps with string keys and structs
//! - [`Option`]: the inner value. [`None`] leaves out the dictionary entry
//!   holding it and can't be written anywhere else.
//!
//! Booleans, floats, unit values, and enum variants with data are not
//! supported.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Ping {
//!     q: String,
//!     txid: String,
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     token: Option<String>,
//! }
//!
//! let ping = Ping {
//!     q: "ping".to_owned(),
//!     txid: "42".to_owned(),
//!     token: None,
//! };
//!
//! let bytes = serde_bencode::to_vec(&ping).unwrap();
//! assert_eq!(bytes, b"d1:q4:ping4:txid2:42e");
//!
//! // keys match fields ignoring case
//! let back: Ping = serde_bencode::from_slice(b"d1:Q4:ping4:TXID2:42e").unwrap();
//! assert_eq!(back, ping);
//! ```
//!
//! [bencode]: <https://www.bittorrent.org/beps/bep_0003.html#bencoding>

pub mod de;
mod error;
mod raw;
pub mod scanner;
pub mod ser;
mod value;


pub use de::{Decoder, Deserializer, from_reader, from_slice};
pub use error::{Error, Result, SyntaxError};
pub use raw::RawValue;
pub use ser::{Encoder, Serializer, is_default, to_vec, to_writer};
pub use value::Value;
