//! Incremental decoder
//!
//! Turns bytes received from a client into [`RespValue`]s. A call either
//! yields one value plus the number of bytes it occupied, reports that the
//! buffer holds only part of a value (`Ok(None)`), or rejects the input.
//!
//! `consumed` covers exactly the bytes of one value, never more. A caller that
//! advances its buffer by `consumed` is left at the first byte of the next
//! value, which is what makes pipelined requests decode back-to-back.
//!
//! ## Line terminators
//!
//! Line-based fields end at the first `\n`. A `\r` right before it is part of
//! the terminator and is stripped; a bare `\n` is accepted as well.

use crate::protocol::types::{prefix, RespValue};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Input that can never become a valid value, however many bytes follow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format (integer values and length fields)
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string, error message or length field
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the null marker `-1`
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative count other than the null marker `-1`
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk payload not followed by a line terminator
    #[error("bulk string missing trailing CRLF")]
    MissingTerminator,

    /// Bulk length above [`MAX_BULK_SIZE`]
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),

    /// The input ended in the middle of a value
    #[error("unexpected end of input")]
    Truncated,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk payload, 512 MiB
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting. Decoding recurses once per level.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Decoder that can be handed a growing buffer repeatedly.
///
/// ```
/// use snapkv::protocol::{RespParser, RespValue};
/// use bytes::{Buf, BytesMut};
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n+OK\r\n"[..]);
///
/// let (value, consumed) = parser.parse(&buffer).unwrap().unwrap();
/// buffer.advance(consumed);
/// assert_eq!(value, RespValue::command(["PING"]));
/// assert_eq!(&buffer[..], b"+OK\r\n");
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes the value at the start of `buf`.
    ///
    /// Bytes after the first value are left alone, so the caller can feed
    /// the remainder back in for pipelined requests.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            prefix::SIMPLE_STRING => parse_simple_string(buf),
            prefix::ERROR => parse_error(buf),
            prefix::INTEGER => parse_integer(buf),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// `*<count>` followed by that many values, or `*-1` for null.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        debug_assert!(buf[0] == prefix::ARRAY);

        let (count, header_len) = match read_length(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if count == -1 {
            return Ok(Some((RespValue::NullArray, header_len)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep(MAX_NESTING_DEPTH));
        }

        self.depth += 1;
        let result = self.parse_elements(buf, count as usize, header_len);
        self.depth -= 1;
        result
    }

    fn parse_elements(
        &mut self,
        buf: &[u8],
        count: usize,
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        // The count comes off the wire; don't let it size the allocation.
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

fn parse_simple_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    debug_assert!(buf[0] == prefix::SIMPLE_STRING);

    Ok(read_text_line(buf)?.map(|(s, consumed)| (RespValue::SimpleString(s), consumed)))
}

fn parse_error(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    debug_assert!(buf[0] == prefix::ERROR);

    Ok(read_text_line(buf)?.map(|(s, consumed)| (RespValue::Error(s), consumed)))
}

fn parse_integer(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    debug_assert!(buf[0] == prefix::INTEGER);

    Ok(read_length(buf)?.map(|(n, consumed)| (RespValue::Integer(n), consumed)))
}

/// `$<length>`, the payload, then a terminator. `$-1` alone is null.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    debug_assert!(buf[0] == prefix::BULK_STRING);

    let (length, data_start) = match read_length(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    // `$-1\r\n`: the length line's terminator is the whole value
    if length == -1 {
        return Ok(Some((RespValue::NullBulkString, data_start)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    let terminator_len = match buf.get(data_end..) {
        None | Some([]) | Some([b'\r']) => return Ok(None),
        Some([b'\n', ..]) => 1,
        Some([b'\r', b'\n', ..]) => 2,
        Some(_) => return Err(ParseError::MissingTerminator),
    };

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((RespValue::BulkString(data), data_end + terminator_len)))
}

/// Finds the end of the line that starts after the prefix byte.
///
/// Returns the line content (terminator stripped) and the number of bytes
/// consumed including the prefix and terminator.
#[inline]
fn find_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let body = &buf[1..];
    let lf = body.iter().position(|&b| b == b'\n')?;
    let line = match body[..lf].last() {
        Some(b'\r') => &body[..lf - 1],
        _ => &body[..lf],
    };
    Some((line, 1 + lf + 1))
}

fn read_text_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match find_line(buf) {
        Some((line, consumed)) => {
            let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s.to_string(), consumed)))
        }
        None => Ok(None),
    }
}

/// Reads the signed base-10 number on the line following the prefix byte.
fn read_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match find_line(buf) {
        Some((line, consumed)) => {
            let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            let n: i64 = s
                .parse()
                .map_err(|e: ParseIntError| ParseError::InvalidInteger(format!("{s:?}: {e}")))?;
            Ok(Some((n, consumed)))
        }
        None => Ok(None),
    }
}

/// One-shot [`RespParser::parse`] without keeping a parser around.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Decodes one value from input that is known to be complete.
///
/// Unlike [`parse_message`], running out of bytes is an error
/// ([`ParseError::Truncated`]) rather than a request for more data.
pub fn decode(buf: &[u8]) -> ParseResult<(RespValue, usize)> {
    parse_message(buf)?.ok_or(ParseError::Truncated)
}
