//! EBML variable-length element ids and element sizes.
//!
//! Both use the same class-marker scheme: the position of the highest set bit
//! in the leading byte selects how many bytes follow. Ids keep their marker bit
//! as part of the value, sizes mask it off.
//!
//! See also: <https://www.rfc-editor.org/rfc/rfc8794#name-variable-size-integer>

use std::fmt;

use arrayvec::ArrayVec;

use crate::error::{Error, Result};

/// Largest value representable as an element id.
pub const MAX_ID: u32 = 0x1FFF_FFFF;

/// Largest known element size. Sizes above this need more than 8 bytes.
pub const MAX_SIZE: u64 = (1 << 56) - 2;

/// Sentinel returned by [`decode_size`] for an all-ones size payload.
pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// A validated EBML element id.
///
/// The value includes the class marker, so the id written as the bytes
/// `1A 45 DF A3` is `ElementId(0x1A45DFA3)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(u32);

impl ElementId {
    /// Validates a raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdOverflow`] if `id` is larger than [`MAX_ID`] and
    /// [`Error::InvalidId`] if the leading byte's marker does not match the
    /// byte length.
    pub fn new(id: u32) -> Result<Self> {
        match check_id(id) {
            IdCheck::Valid => Ok(Self(id)),
            IdCheck::Overflow => Err(Error::IdOverflow(id)),
            IdCheck::BadMarker => Err(Error::InvalidId(id)),
        }
    }

    /// Validates a raw id at compile time.
    ///
    /// # Panics
    ///
    /// Panics if the id is invalid. In a const context, this is a compile
    /// error instead.
    pub const fn from_const(id: u32) -> Self {
        assert!(
            matches!(check_id(id), IdCheck::Valid),
            "invalid element id"
        );
        Self(id)
    }

    /// Parses a hexadecimal id tag, such as `"1A45DFA3"` or `"0x4286"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedTag`] if the tag isn't hexadecimal, otherwise
    /// the same errors as [`ElementId::new`].
    pub fn from_tag(tag: &str) -> Result<Self> {
        let hex = tag
            .strip_prefix("0x")
            .or_else(|| tag.strip_prefix("0X"))
            .unwrap_or(tag);

        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::MalformedTag(tag.to_owned()));
        }

        let id = u32::from_str_radix(hex, 16).map_err(|_| Error::MalformedTag(tag.to_owned()))?;
        Self::new(id)
    }

    /// Gets the raw id value, including its marker.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Gets the amount of bytes the id takes up when encoded.
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(self) -> usize {
        id_byte_len(self.0)
    }

    /// Gets the encoded bytes.
    pub fn to_bytes(self) -> ArrayVec<u8, 4> {
        let bytes = self.0.to_be_bytes();
        let mut buf = ArrayVec::new();
        buf.extend(bytes[4 - self.len()..].iter().copied());
        buf
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl TryFrom<u32> for ElementId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ElementId> for u32 {
    fn from(value: ElementId) -> Self {
        value.0
    }
}

enum IdCheck {
    Valid,
    Overflow,
    BadMarker,
}

const fn id_byte_len(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

const fn check_id(id: u32) -> IdCheck {
    if id > MAX_ID {
        return IdCheck::Overflow;
    }

    let len = id_byte_len(id);
    #[allow(clippy::cast_possible_truncation)]
    let lead = (id >> ((len - 1) * 8)) as u8;
    match id_len(lead) {
        Some(l) if l == len => IdCheck::Valid,
        _ => IdCheck::BadMarker,
    }
}

/// Gets the total length of an id from its leading byte.
///
/// Returns [`None`] if the byte carries no valid class marker.
pub const fn id_len(lead: u8) -> Option<usize> {
    match lead {
        0x80..=0xFF => Some(1),
        0x40..=0x7F => Some(2),
        0x20..=0x3F => Some(3),
        0x10..=0x1F => Some(4),
        _ => None,
    }
}

/// Gets the total length of a size from its leading byte.
///
/// Returns [`None`] if the byte is zero.
#[allow(clippy::cast_possible_truncation)]
pub const fn size_len(lead: u8) -> Option<usize> {
    if lead == 0 {
        None
    } else {
        Some(lead.leading_zeros() as usize + 1)
    }
}

/// Encodes an element id.
///
/// # Errors
///
/// Same as [`ElementId::new`].
pub fn encode_id(id: u32) -> Result<ArrayVec<u8, 4>> {
    ElementId::new(id).map(ElementId::to_bytes)
}

/// Decodes an element id from the start of `bytes`.
///
/// Returns the id and the amount of bytes consumed.
///
/// # Errors
///
/// Returns [`Error::InvalidIdMarker`] if the leading byte is below `0x10` and
/// [`Error::TruncatedStream`] if `bytes` ends early.
pub fn decode_id(bytes: &[u8]) -> Result<(ElementId, usize)> {
    let &lead = bytes.first().ok_or(Error::TruncatedStream { offset: 0 })?;
    let len = id_len(lead).ok_or(Error::InvalidIdMarker { offset: 0 })?;
    let raw = bytes.get(..len).ok_or(Error::TruncatedStream {
        offset: bytes.len() as u64,
    })?;

    let id = raw.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok((ElementId(id), len))
}

/// Gets the amount of bytes [`encode_size`] produces for `size`.
///
/// # Errors
///
/// Returns [`Error::SizeOverflow`] if `size` is larger than [`MAX_SIZE`].
pub fn encoded_size_len(size: u64) -> Result<usize> {
    (1..=8)
        .find(|&tier| size <= tier_max(tier))
        .ok_or(Error::SizeOverflow(size))
}

/// Encodes an element size in the smallest tier that can hold it.
///
/// # Errors
///
/// Returns [`Error::SizeOverflow`] if `size` is larger than [`MAX_SIZE`].
pub fn encode_size(size: u64) -> Result<ArrayVec<u8, 8>> {
    let len = encoded_size_len(size)?;
    let marked = size | (1 << (7 * len));
    let bytes = marked.to_be_bytes();

    let mut buf = ArrayVec::new();
    buf.extend(bytes[8 - len..].iter().copied());
    Ok(buf)
}

/// Decodes an element size from the start of `bytes`.
///
/// Returns the size and the amount of bytes consumed. An all-ones payload
/// decodes to [`UNKNOWN_SIZE`].
///
/// # Errors
///
/// Returns [`Error::InvalidSizeMarker`] if the leading byte is zero and
/// [`Error::TruncatedStream`] if `bytes` ends early.
pub fn decode_size(bytes: &[u8]) -> Result<(u64, usize)> {
    let &lead = bytes.first().ok_or(Error::TruncatedStream { offset: 0 })?;
    let len = size_len(lead).ok_or(Error::InvalidSizeMarker { offset: 0 })?;
    let raw = bytes.get(..len).ok_or(Error::TruncatedStream {
        offset: bytes.len() as u64,
    })?;

    Ok((size_from_raw(raw), len))
}

/// Strips the marker from a complete encoded size.
pub(crate) fn size_from_raw(raw: &[u8]) -> u64 {
    let len = raw.len();
    let marked = raw.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    let mask = (1u64 << (7 * len)) - 1;
    let size = marked & mask;

    if size == mask { UNKNOWN_SIZE } else { size }
}

const fn tier_max(tier: usize) -> u64 {
    (1 << (7 * tier)) - 2
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! size_bytes {
        ($fn_name:ident, $size:expr, $bytes:expr) => {
            #[test]
            fn $fn_name() {
                let bytes: &[u8] = &$bytes;
                let enc = encode_size($size).expect("size must encode");
                assert_eq!(enc.as_slice(), bytes, "wrong encoding");

                let (dec, len) = decode_size(bytes).expect("size must decode");
                assert_eq!(dec, $size, "wrong value");
                assert_eq!(len, bytes.len(), "wrong length");
            }
        };
    }

    size_bytes!(size_zero, 0, [0x80]);
    size_bytes!(size_one, 1, [0x81]);
    size_bytes!(size_tier_one_max, 126, [0xFE]);
    size_bytes!(size_tier_two_min, 127, [0x40, 0x7F]);
    size_bytes!(size_tier_two_max, 16382, [0x7F, 0xFE]);
    size_bytes!(size_four_bytes, 0x0A0B_0C0D, [0x1A, 0x0B, 0x0C, 0x0D]);
    size_bytes!(
        size_tier_eight,
        (1 << 56) - 3,
        [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFD]
    );

    #[test]
    fn size_overflow() {
        let err = encode_size(MAX_SIZE + 1).expect_err("size is too large");
        assert!(matches!(err, Error::SizeOverflow(_)), "wrong error: {err:?}");
        encode_size(MAX_SIZE).expect("max size must encode");
    }

    #[test]
    fn size_unknown() {
        assert_eq!(
            decode_size(&[0xFF]).expect("valid size"),
            (UNKNOWN_SIZE, 1),
            "one byte of ones is unknown"
        );
        assert_eq!(
            decode_size(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).expect("valid size"),
            (UNKNOWN_SIZE, 8),
            "eight bytes of ones is unknown"
        );
    }

    #[test]
    fn size_non_minimal_accepted() {
        assert_eq!(
            decode_size(&[0x40, 0x05]).expect("valid size"),
            (5, 2),
            "two byte tier"
        );
        assert_eq!(
            decode_size(&[0x01, 0, 0, 0, 0, 0, 0, 0]).expect("valid size"),
            (0, 8),
            "eight byte tier"
        );
    }

    #[test]
    fn size_bad_marker() {
        let err = decode_size(&[0x00, 0x81]).expect_err("zero lead byte");
        assert!(
            matches!(err, Error::InvalidSizeMarker { .. }),
            "wrong error: {err:?}"
        );

        let err = decode_size(&[0x20, 0x00]).expect_err("too short");
        assert!(
            matches!(err, Error::TruncatedStream { .. }),
            "wrong error: {err:?}"
        );
    }

    #[test]
    fn size_round_trip() {
        for shift in 0..56 {
            for size in [(1u64 << shift) - 1, 1 << shift, (1 << shift) + 1] {
                if size > MAX_SIZE {
                    continue;
                }

                let enc = encode_size(size).expect("size must encode");
                let len = encoded_size_len(size).expect("size must fit");
                assert_eq!(enc.len(), len, "length mismatch for {size}");

                let dec = decode_size(&enc).expect("size must decode");
                assert_eq!(dec, (size, len), "round trip failed for {size}");
            }
        }
    }

    #[test]
    fn id_encode() {
        let cases: &[(u32, &[u8])] = &[
            (0x81, &[0x81]),
            (0x4286, &[0x42, 0x86]),
            (0x3F_0000, &[0x3F, 0x00, 0x00]),
            (0x1A45_DFA3, &[0x1A, 0x45, 0xDF, 0xA3]),
        ];

        for &(id, bytes) in cases {
            let enc = encode_id(id).expect("id must encode");
            assert_eq!(enc.as_slice(), bytes, "wrong encoding for {id:x}");

            let dec = decode_id(bytes).expect("id must decode");
            assert_eq!(dec, (ElementId(id), bytes.len()), "wrong decoding for {id:x}");
        }
    }

    #[test]
    fn id_invalid() {
        let err = encode_id(0x2000_0000).expect_err("too large");
        assert!(matches!(err, Error::IdOverflow(_)), "wrong error: {err:?}");

        for id in [0, 0x7F, 0x8000, 0x0F_0000] {
            let err = encode_id(id).expect_err("bad marker");
            assert!(matches!(err, Error::InvalidId(_)), "wrong error: {err:?}");
        }

        let err = decode_id(&[0x0F]).expect_err("bad marker");
        assert!(
            matches!(err, Error::InvalidIdMarker { .. }),
            "wrong error: {err:?}"
        );

        let err = decode_id(&[0x3F, 0x00]).expect_err("too short");
        assert!(
            matches!(err, Error::TruncatedStream { .. }),
            "wrong error: {err:?}"
        );
    }

    #[test]
    fn id_tag() {
        let id = ElementId::from_tag("4286").expect("plain hex");
        assert_eq!(id.get(), 0x4286, "plain hex");

        let id = ElementId::from_tag("0x1A45DFA3").expect("prefixed hex");
        assert_eq!(id.get(), 0x1A45_DFA3, "prefixed hex");
        assert_eq!(id.to_string(), "1a45dfa3", "display is lowercase hex");

        for tag in ["DocType", "", "0x", "-"] {
            let err = ElementId::from_tag(tag).expect_err("not hex");
            assert!(matches!(err, Error::MalformedTag(_)), "wrong error: {err:?}");
        }
    }
}
