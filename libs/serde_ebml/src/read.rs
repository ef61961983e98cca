//! Exposes a specialized reader trait.

use std::io::{self, Read as _};
use std::ops::Range;

use crate::error::{Error, Result};

/// Specialized reader trait for use with [`Deserializer`](crate::de::Deserializer).
///
/// By default, this is implemented for [`SliceRead`], [`IoRead`] and mutable
/// references to [`Read`] implementations.
///
/// Readers track their absolute position so errors can report offsets and
/// containers can tell where they end. Running out of data mid-read is
/// reported as [`Error::TruncatedStream`].
///
/// Elements can be put aside with [`Read::stash`] and handed back with
/// [`Read::replay`]. Replayed elements are read again, at their original
/// offsets, before the rest of the input.
///
/// This trait also allows access to borrowed data if supported at runtime.
/// `'de` represents that borrowed lifetime and is otherwise unused.
pub trait Read<'de> {
    /// What the reader keeps for an element it will read again.
    type Stash;

    /// The amount of bytes consumed so far.
    fn position(&self) -> u64;

    /// Reads a single byte, returning [`None`] at the end of the input.
    fn next_byte(&mut self) -> Result<Option<u8>>;

    /// Fills the buffer completely.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Reads a chunk of bytes, possibly borrowed from the reader for the
    /// duration of the call.
    fn read_byte_view<F, T>(&mut self, len: usize, access: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>;

    /// Reads a chunk of bytes, returning it as a newly allocated [`Vec`].
    fn read_byte_vec(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Discards exactly `len` bytes.
    fn skip(&mut self, len: u64) -> Result<()>;

    /// Discards everything up to the end of the input.
    ///
    /// This also drops any element that was about to be replayed.
    fn skip_rest(&mut self) -> Result<()>;

    /// Moves past the element starting at `start`, keeping it for
    /// [`Read::replay`].
    ///
    /// The reader is right after the element's `header`. `len` is the payload
    /// length, or [`None`] if the payload runs up to the end of the input.
    fn stash(&mut self, start: u64, header: &[u8], len: Option<u64>) -> Result<Self::Stash>;

    /// Reads the stashed elements next, in order, then continues where the
    /// reader is now.
    fn replay(&mut self, stash: Vec<Self::Stash>);

    /// Attempts to read a chunk of bytes, borrowing from the reader.
    ///
    /// If the reader supports borrowing data from it, returns [`Some`] with the
    /// result of the operation. If the reader does not support it, returns
    /// [`None`] without advancing.
    ///
    /// If [`None`] was returned, calling another reader method with the same
    /// `len` must have the same result as if this method was never called.
    fn try_read_bytes_borrow(&mut self, len: usize) -> Option<Result<&'de [u8]>> {
        _ = len;
        None
    }
}

// this implementation is required so the reader can be reborrowed
impl<'de, R: Read<'de>> Read<'de> for &mut R {
    type Stash = R::Stash;

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        (**self).next_byte()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn read_byte_view<F, T>(&mut self, len: usize, access: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        (**self).read_byte_view(len, access)
    }

    fn read_byte_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).read_byte_vec(len)
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        (**self).skip(len)
    }

    fn skip_rest(&mut self) -> Result<()> {
        (**self).skip_rest()
    }

    fn stash(&mut self, start: u64, header: &[u8], len: Option<u64>) -> Result<Self::Stash> {
        (**self).stash(start, header, len)
    }

    fn replay(&mut self, stash: Vec<Self::Stash>) {
        (**self).replay(stash);
    }

    fn try_read_bytes_borrow(&mut self, len: usize) -> Option<Result<&'de [u8]>> {
        (**self).try_read_bytes_borrow(len)
    }
}

/// Wraps a slice so it can be used as a [`Read`].
///
/// You cannot directly construct this type. Instead use
/// [`Deserializer::from_slice`](crate::de::Deserializer::from_slice).
#[derive(Debug)]
pub struct SliceRead<'de> {
    slice: &'de [u8],
    pos: usize,
    /// Ranges being replayed. The last one is read first.
    replaying: Vec<Range<usize>>,
}

impl<'de> SliceRead<'de> {
    pub(crate) fn new(slice: &'de [u8]) -> Self {
        Self {
            slice,
            pos: 0,
            replaying: Vec::new(),
        }
    }

    /// Gets the remaining unread part of the slice.
    ///
    /// This starts at the earliest element still waiting to be replayed.
    pub fn remainder(&self) -> &'de [u8] {
        let start = self.replaying.iter().map(|r| r.start).fold(self.pos, usize::min);
        &self.slice[start..]
    }

    fn eof(&self) -> Error {
        Error::TruncatedStream {
            offset: self.slice.len() as u64,
        }
    }

    fn cursor(&self) -> usize {
        self.replaying.last().map_or(self.pos, |r| r.start)
    }

    /// Bytes left before the end of the input or the replayed range.
    fn available(&self) -> usize {
        match self.replaying.last() {
            Some(range) => range.len(),
            None => self.slice.len() - self.pos,
        }
    }

    #[inline]
    fn read_bytes_borrow(&mut self, len: usize) -> Result<&'de [u8]> {
        let slice = self.slice;
        let (cursor, end) = match self.replaying.last_mut() {
            Some(range) => (&mut range.start, range.end),
            None => (&mut self.pos, slice.len()),
        };

        let start = *cursor;
        let out = start
            .checked_add(len)
            .filter(|&stop| stop <= end)
            .and_then(|stop| slice.get(start..stop))
            .ok_or(Error::TruncatedStream { offset: end as u64 })?;

        *cursor += len;
        self.settle();
        Ok(out)
    }

    /// Drops replayed ranges that have been read completely.
    fn settle(&mut self) {
        while self.replaying.last().is_some_and(Range::is_empty) {
            self.replaying.pop();
        }
    }
}

impl<'de> Read<'de> for SliceRead<'de> {
    type Stash = Range<usize>;

    fn position(&self) -> u64 {
        self.cursor() as u64
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.available() == 0 {
            return Ok(None);
        }

        self.read_bytes_borrow(1).map(|b| b.first().copied())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let src = self.read_bytes_borrow(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn read_byte_view<F, T>(&mut self, len: usize, access: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        self.read_bytes_borrow(len).and_then(access)
    }

    fn read_byte_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        self.read_bytes_borrow(len).map(<[u8]>::to_vec)
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| self.eof())?;
        self.read_bytes_borrow(len).map(|_| ())
    }

    fn skip_rest(&mut self) -> Result<()> {
        self.replaying.clear();
        self.pos = self.slice.len();
        Ok(())
    }

    fn stash(&mut self, start: u64, _header: &[u8], len: Option<u64>) -> Result<Range<usize>> {
        let start = usize::try_from(start).map_err(|_| self.eof())?;
        let len = match len {
            Some(len) => usize::try_from(len).map_err(|_| self.eof())?,
            None => self.available(),
        };

        // taken before reading, which may move on to the next range
        let data = self.cursor();
        self.read_bytes_borrow(len)?;
        Ok(start..data + len)
    }

    fn replay(&mut self, stash: Vec<Range<usize>>) {
        self.replaying.extend(stash.into_iter().rev());
        self.settle();
    }

    fn try_read_bytes_borrow(&mut self, len: usize) -> Option<Result<&'de [u8]>> {
        Some(self.read_bytes_borrow(len))
    }
}

/// Wraps a [`io::Read`] implementation so it can be used as a [`Read`].
///
/// You cannot directly construct this type. Instead use
/// [`Deserializer::from_reader`](crate::de::Deserializer::from_reader).
#[derive(Debug)]
pub struct IoRead<R> {
    pub(crate) inner: R,
    pos: u64,
    /// Elements being replayed. The last one is read first.
    replaying: Vec<IoStash>,
}

/// The bytes of an element stashed by an [`IoRead`].
#[derive(Debug)]
pub struct IoStash {
    start: u64,
    bytes: Vec<u8>,
    at: usize,
}

impl IoStash {
    fn position(&self) -> u64 {
        self.start + self.at as u64
    }

    fn rest(&self) -> usize {
        self.bytes.len() - self.at
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.at;
        let out = start
            .checked_add(len)
            .and_then(|end| self.bytes.get(start..end))
            .ok_or(Error::TruncatedStream {
                offset: self.start + self.bytes.len() as u64,
            })?;

        self.at += len;
        Ok(out)
    }
}

impl<R> IoRead<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            replaying: Vec::new(),
        }
    }

    /// Drops replayed elements that have been read completely.
    fn settle(&mut self) {
        while self.replaying.last().is_some_and(|s| s.rest() == 0) {
            self.replaying.pop();
        }
    }

    /// Takes `len` bytes from the element being replayed, if any.
    fn replayed<F, T>(&mut self, len: usize, access: F) -> Option<Result<T>>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        let stash = self.replaying.last_mut()?;
        let res = stash.take(len).and_then(access);
        self.settle();
        Some(res)
    }
}

impl<R: io::Read> IoRead<R> {
    /// Reads up to `limit` bytes into `buf`, returning how many were read.
    fn read_limited(&mut self, limit: u64, buf: &mut Vec<u8>) -> Result<u64> {
        let read = self.inner.by_ref().take(limit).read_to_end(buf)?;
        let read = read as u64;
        self.pos += read;
        Ok(read)
    }
}

impl<R: io::Read> Read<'_> for IoRead<R> {
    type Stash = IoStash;

    fn position(&self) -> u64 {
        self.replaying.last().map_or(self.pos, IoStash::position)
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        if let Some(res) = self.replayed(1, |b| Ok(b.first().copied())) {
            return res;
        }

        let mut buf = [0u8];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(buf[0]));
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Some(res) = self.replayed(buf.len(), |src| {
            buf.copy_from_slice(src);
            Ok(())
        }) {
            return res;
        }

        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(Error::TruncatedStream { offset: self.pos })
            },
            Err(e) => Err(e.into()),
        }
    }

    fn read_byte_view<F, T>(&mut self, len: usize, access: F) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        const STACK: usize = 0x1000;

        if let Some(stash) = self.replaying.last_mut() {
            let res = stash.take(len).and_then(access);
            self.settle();
            return res;
        }

        if len <= STACK {
            let mut buf = [0u8; STACK];
            let buf = &mut buf[..len];
            self.read_exact(buf)?;
            access(buf)
        } else {
            // allocate if more than 4KiB is requested. we don't want to blow up the stack
            // in case the data is wrong.
            let vec = self.read_byte_vec(len)?;
            access(&vec)
        }
    }

    #[inline(never)]
    fn read_byte_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        if let Some(res) = self.replayed(len, |src| Ok(src.to_vec())) {
            return res;
        }

        // don't allocate too much or incorrect sizes could lead to a DoS
        let capacity = len.min(0x1000);
        let mut buf = Vec::with_capacity(capacity);
        let limit = len as u64;
        self.read_limited(limit, &mut buf)?;

        if buf.len() == len {
            Ok(buf)
        } else {
            Err(Error::TruncatedStream { offset: self.pos })
        }
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        if !self.replaying.is_empty() {
            let offset = self.position();
            let len = usize::try_from(len).map_err(|_| Error::TruncatedStream { offset })?;
            return self.read_byte_view(len, |_| Ok(()));
        }

        let skipped = io::copy(&mut self.inner.by_ref().take(len), &mut io::sink())?;
        self.pos += skipped;

        if skipped == len {
            Ok(())
        } else {
            Err(Error::TruncatedStream { offset: self.pos })
        }
    }

    fn skip_rest(&mut self) -> Result<()> {
        self.replaying.clear();
        self.pos += io::copy(&mut self.inner, &mut io::sink())?;
        Ok(())
    }

    fn stash(&mut self, start: u64, header: &[u8], len: Option<u64>) -> Result<IoStash> {
        let mut bytes = header.to_vec();
        let replaying = self.replaying.last().map(IoStash::rest);
        match (replaying, len) {
            (Some(rest), len) => {
                let offset = self.position();
                let len = match len {
                    Some(len) => usize::try_from(len).map_err(|_| Error::TruncatedStream { offset })?,
                    None => rest,
                };

                let payload = self.read_byte_vec(len)?;
                bytes.extend_from_slice(&payload);
            },
            (None, Some(len)) => {
                if self.read_limited(len, &mut bytes)? != len {
                    return Err(Error::TruncatedStream { offset: self.pos });
                }
            },
            (None, None) => {
                self.read_limited(u64::MAX, &mut bytes)?;
            },
        }

        Ok(IoStash {
            start,
            bytes,
            at: 0,
        })
    }

    fn replay(&mut self, stash: Vec<IoStash>) {
        self.replaying.extend(stash.into_iter().rev());
        self.settle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<'de>(mut reader: impl Read<'de>) {
        assert_eq!(reader.next_byte().expect("in range"), Some(1), "first byte");

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).expect("in range");
        assert_eq!(buf, [2, 3], "exact read");

        reader.skip(2).expect("in range");
        assert_eq!(reader.position(), 5, "position after skip");

        let sum = reader
            .read_byte_view(2, |v| Ok(v.iter().map(|&b| u32::from(b)).sum::<u32>()))
            .expect("in range");
        assert_eq!(sum, 13, "view read");

        let err = reader.read_byte_vec(5).expect_err("past the end");
        assert!(
            matches!(err, Error::TruncatedStream { .. }),
            "wrong error: {err:?}"
        );
    }

    fn stash_and_replay<'de>(mut reader: impl Read<'de>) {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header).expect("in range");
        let stash = reader.stash(0, &header, Some(1)).expect("in range");
        assert_eq!(reader.next_byte().expect("in range"), Some(4), "moved past the stash");

        reader.replay(vec![stash]);
        assert_eq!(reader.position(), 0, "back at the stashed element");
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).expect("in range");
        assert_eq!(buf, [1, 2, 3], "stashed bytes");
        assert_eq!(reader.position(), 4, "continues after the replay");
        assert_eq!(reader.next_byte().expect("in range"), Some(5), "rest of the input");

        let stash = reader.stash(5, &[], None).expect("in range");
        assert_eq!(reader.next_byte().expect("no error"), None, "stashed up to the end");

        reader.replay(vec![stash]);
        assert_eq!(reader.position(), 5, "replaying the tail");
        assert_eq!(reader.read_byte_vec(3).expect("in range"), [6, 7, 8], "tail bytes");
        assert_eq!(reader.next_byte().expect("no error"), None, "end of input");
    }

    const DATA: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn slice_read() {
        exercise(SliceRead::new(DATA));
        stash_and_replay(SliceRead::new(DATA));

        let mut reader = SliceRead::new(DATA);
        reader.skip(6).expect("in range");
        assert_eq!(reader.remainder(), [7, 8], "remainder");
        assert_eq!(
            reader.try_read_bytes_borrow(2).map(|r| r.expect("in range")),
            Some(&[7u8, 8][..]),
            "borrowed read"
        );
        assert_eq!(reader.next_byte().expect("no error"), None, "end of input");
    }

    #[test]
    fn io_read() {
        exercise(IoRead::new(DATA));
        stash_and_replay(IoRead::new(DATA));

        let mut reader = IoRead::new(DATA);
        assert!(reader.try_read_bytes_borrow(2).is_none(), "can't borrow");
        reader.skip_rest().expect("in memory");
        assert_eq!(reader.position(), 8, "at the end");
        assert_eq!(reader.next_byte().expect("no error"), None, "end of input");
        reader.skip(1).expect_err("nothing left");
    }
}
