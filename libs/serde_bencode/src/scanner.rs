//! A byte-at-a-time validator for bencode.
//!
//! The [`Scanner`] checks that input is well-formed without building any
//! values. It is fed one byte at a time, which lets callers find where a value
//! ends in a stream without knowing its length up front.
//!
//! The grammar is strict: integers have no leading zeros and no `-0`, string
//! lengths have no leading zeros, and dictionary keys must be strings.

use crate::error::SyntaxError;

/// What a [`Scanner`] has seen after a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The value isn't done yet.
    Continue,
    /// The byte completed the top-level value.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Start of any value.
    Value,
    /// Inside a list, a value or `e`.
    ListItem,
    /// Inside a dictionary, a key string or `e`.
    DictKey,
    /// Right after `i`.
    IntStart,
    /// Right after `i-`.
    IntNegative,
    /// After `i0`, only `e` may follow.
    IntZero,
    IntDigits,
    /// After a leading `0` length, only `:` may follow.
    LenZero,
    LenDigits,
    /// Inside string bytes, with `remain` left.
    Str,
    /// The top-level value is complete.
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    List,
    DictKey,
    DictValue,
}

/// A bencode scanning state machine.
///
/// Containers are tracked on an explicit stack, so nesting depth is only
/// bounded by memory.
#[derive(Debug, Clone)]
pub struct Scanner {
    state: State,
    stack: Vec<Frame>,
    remain: u64,
    offset: u64,
    error: Option<SyntaxError>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Creates a scanner at the start of a value.
    pub fn new() -> Self {
        Self {
            state: State::Value,
            stack: Vec::new(),
            remain: 0,
            offset: 0,
            error: None,
        }
    }

    /// Prepares the scanner for the next value.
    pub fn reset(&mut self) {
        self.state = State::Value;
        self.stack.clear();
        self.remain = 0;
        self.offset = 0;
        self.error = None;
    }

    /// The amount of bytes fed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// How many containers are currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feeds the next byte.
    ///
    /// # Errors
    ///
    /// Returns the [`SyntaxError`] for the first invalid byte. Once an error
    /// was returned, every later call returns that same error.
    pub fn step(&mut self, c: u8) -> Result<Scan, SyntaxError> {
        let scan = self.transition(c);
        self.offset += 1;
        scan
    }

    /// Signals the end of input.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] if the value isn't complete yet.
    pub fn eof(&mut self) -> Result<(), SyntaxError> {
        match self.state {
            State::Done => Ok(()),
            State::Failed => Err(self.failed()),
            _ => Err(self.fail(SyntaxError::new(
                "unexpected end of bencode input",
                self.offset,
            ))),
        }
    }

    fn transition(&mut self, c: u8) -> Result<Scan, SyntaxError> {
        match self.state {
            State::Value => self.begin_value(c),
            State::ListItem => match c {
                b'e' => self.end_container(),
                _ => self.begin_value(c),
            },
            State::DictKey => match c {
                b'e' => self.end_container(),
                b'0'..=b'9' => self.begin_len(c),
                _ => self.invalid(c, "looking for dictionary key"),
            },
            State::IntStart => match c {
                b'-' => self.to(State::IntNegative),
                b'0' => self.to(State::IntZero),
                b'1'..=b'9' => self.to(State::IntDigits),
                _ => self.invalid(c, "in integer"),
            },
            State::IntNegative => match c {
                b'1'..=b'9' => self.to(State::IntDigits),
                _ => self.invalid(c, "in negative integer"),
            },
            State::IntZero => match c {
                b'e' => self.end_value(),
                _ => self.invalid(c, "after leading zero in integer"),
            },
            State::IntDigits => match c {
                b'0'..=b'9' => Ok(Scan::Continue),
                b'e' => self.end_value(),
                _ => self.invalid(c, "in integer"),
            },
            State::LenZero => match c {
                b':' => self.begin_string(),
                _ => self.invalid(c, "after leading zero in string length"),
            },
            State::LenDigits => match c {
                b'0'..=b'9' => {
                    let digit = u64::from(c - b'0');
                    match self.remain.checked_mul(10).and_then(|v| v.checked_add(digit)) {
                        Some(v) => {
                            self.remain = v;
                            Ok(Scan::Continue)
                        },
                        None => self.invalid(c, "overflows string length"),
                    }
                },
                b':' => self.begin_string(),
                _ => self.invalid(c, "in string length"),
            },
            State::Str => {
                self.remain -= 1;
                if self.remain == 0 {
                    self.end_value()
                } else {
                    Ok(Scan::Continue)
                }
            },
            State::Done => self.invalid(c, "after top-level value"),
            State::Failed => Err(self.failed()),
        }
    }

    fn to(&mut self, state: State) -> Result<Scan, SyntaxError> {
        self.state = state;
        Ok(Scan::Continue)
    }

    fn begin_value(&mut self, c: u8) -> Result<Scan, SyntaxError> {
        match c {
            b'i' => self.to(State::IntStart),
            b'l' => {
                self.stack.push(Frame::List);
                self.to(State::ListItem)
            },
            b'd' => {
                self.stack.push(Frame::DictKey);
                self.to(State::DictKey)
            },
            b'0'..=b'9' => self.begin_len(c),
            _ => self.invalid(c, "looking for beginning of value"),
        }
    }

    fn begin_len(&mut self, c: u8) -> Result<Scan, SyntaxError> {
        self.remain = u64::from(c - b'0');
        if c == b'0' {
            self.to(State::LenZero)
        } else {
            self.to(State::LenDigits)
        }
    }

    fn begin_string(&mut self) -> Result<Scan, SyntaxError> {
        if self.remain == 0 {
            self.end_value()
        } else {
            self.to(State::Str)
        }
    }

    fn end_container(&mut self) -> Result<Scan, SyntaxError> {
        self.stack.pop();
        self.end_value()
    }

    fn end_value(&mut self) -> Result<Scan, SyntaxError> {
        match self.stack.last_mut() {
            None => {
                self.state = State::Done;
                Ok(Scan::End)
            },
            Some(Frame::List) => self.to(State::ListItem),
            Some(frame @ Frame::DictKey) => {
                *frame = Frame::DictValue;
                self.to(State::Value)
            },
            Some(frame @ Frame::DictValue) => {
                *frame = Frame::DictKey;
                self.to(State::DictKey)
            },
        }
    }

    fn invalid(&mut self, c: u8, context: &str) -> Result<Scan, SyntaxError> {
        let msg = format!("invalid character {:?} {context}", char::from(c));
        Err(self.fail(SyntaxError::new(msg, self.offset)))
    }

    fn fail(&mut self, error: SyntaxError) -> SyntaxError {
        self.state = State::Failed;
        self.error = Some(error.clone());
        error
    }

    fn failed(&self) -> SyntaxError {
        self.error
            .clone()
            .unwrap_or_else(|| SyntaxError::new("scanner failed", self.offset))
    }
}

/// Checks that `data` is exactly one well-formed bencode value.
///
/// # Errors
///
/// Returns a [`SyntaxError`] for the first invalid byte, for trailing bytes,
/// or for input that ends early.
pub fn check_valid(data: &[u8]) -> Result<(), SyntaxError> {
    let mut scan = Scanner::new();
    for &c in data {
        scan.step(c)?;
    }
    scan.eof()
}

/// Splits `data` after its first complete bencode value.
///
/// # Errors
///
/// Returns a [`SyntaxError`] if the first value is invalid or incomplete.
pub fn next_value(data: &[u8]) -> Result<(&[u8], &[u8]), SyntaxError> {
    let mut scan = Scanner::new();
    for (i, &c) in data.iter().enumerate() {
        if scan.step(c)? == Scan::End {
            return Ok(data.split_at(i + 1));
        }
    }

    scan.eof()?;
    Ok((data, &[]))
}
