//! Wire values
//!
//! Requests and replies are built from five kinds of value, each introduced
//! by one prefix byte:
//!
//! | prefix | value | encoding |
//! |---|---|---|
//! | `+` | simple string | `+OK\r\n` |
//! | `-` | error | `-ERR key is empty\r\n` |
//! | `:` | integer | `:2\r\n` |
//! | `$` | bulk string | `$3\r\nbar\r\n`, null is `$-1\r\n` |
//! | `*` | array | `*1\r\n$4\r\nPING\r\n`, null is `*-1\r\n` |
//!
//! The encoder always writes CRLF. The decoder in [`super::parser`] also
//! accepts a bare LF.

use bytes::Bytes;
use std::fmt;

/// Line terminator written by the encoder
pub const CRLF: &[u8] = b"\r\n";

/// First byte of every encoded value
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One decoded or to-be-encoded value.
///
/// Exactly one variant is populated at a time, so every consumer matches
/// exhaustively. A null bulk string and a null array are their own variants:
/// neither is the same thing as an empty bulk string or an empty array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Single line of text
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// Arbitrary bytes, may be empty
    BulkString(Bytes),
    NullBulkString,
    /// Elements of any kind, including nested arrays
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    /// `+<s>\r\n`. A CR or LF in `s` is encoded as a space.
    ///
    /// ```
    /// use snapkv::protocol::types::RespValue;
    /// assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// `-<message>\r\n`
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Length-prefixed, binary-safe payload.
    ///
    /// ```
    /// use snapkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let reply = RespValue::bulk_string(Bytes::from_static(b"a\r\nb"));
    /// assert_eq!(reply.serialize(), b"$4\r\na\r\nb\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// The `+OK` acknowledgement.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Builds a request array out of command words, the way clients send them.
    pub fn command<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        RespValue::Array(
            words
                .into_iter()
                .map(|w| RespValue::BulkString(w.into()))
                .collect(),
        )
    }

    /// Encodes this value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the encoding of this value to `buf`.
    ///
    /// Every header line, including an array's count line, ends in CRLF.
    /// A CR or LF inside a simple string or error is written as a space, so
    /// one value always encodes as exactly one reply.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_text_line(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_text_line(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::NullBulkString => write_line(buf, prefix::BULK_STRING, NULL_LENGTH),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::NullArray => write_line(buf, prefix::ARRAY, NULL_LENGTH),
        }
    }

    /// Rough size of the encoding, used to pre-size buffers.
    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::SimpleString(s) | RespValue::Error(s) => s.len() + 3,
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(values) => 16 + values.iter().map(Self::encoded_len_hint).sum::<usize>(),
            _ => 24,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// UTF-8 view of a simple or bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

const NULL_LENGTH: &[u8] = b"-1";

fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

fn write_text_line(buf: &mut Vec<u8>, prefix: u8, text: &str) {
    buf.push(prefix);
    buf.extend(text.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        other => other,
    }));
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "{}", s),
            RespValue::Integer(n) => write!(f, "{}", n),
            RespValue::BulkString(data) => {
                match std::str::from_utf8(data) {
                    Ok(s) => write!(f, "{:?}", s),
                    Err(_) => write!(f, "<{} bytes>", data.len()),
                }
            }
            RespValue::NullBulkString | RespValue::NullArray => write!(f, "nil"),
            RespValue::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(
            RespValue::error("ERR unsupported command 'FOO'").serialize(),
            b"-ERR unsupported command 'FOO'\r\n"
        );
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(
            RespValue::integer(i64::MIN).serialize(),
            b":-9223372036854775808\r\n"
        );
    }

    #[test]
    fn test_line_breaks_in_text_values_stay_on_one_line() {
        assert_eq!(
            RespValue::error("ERR unknown 'a\r\n+OK'").serialize(),
            b"-ERR unknown 'a  +OK'\r\n"
        );
        assert_eq!(RespValue::simple_string("x\ny").serialize(), b"+x y\r\n");
    }

    #[test]
    fn test_bulk_payload_is_not_escaped() {
        let value = RespValue::bulk_string(Bytes::from_static(b"a,b\r\n"));
        assert_eq!(value.serialize(), b"$5\r\na,b\r\n\r\n");
    }

    #[test]
    fn test_empty_and_null_bulk_differ() {
        assert_eq!(RespValue::bulk_string(Bytes::new()).serialize(), b"$0\r\n\r\n");
        assert_eq!(RespValue::NullBulkString.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_empty_and_null_array_differ() {
        assert_eq!(RespValue::array(vec![]).serialize(), b"*0\r\n");
        assert_eq!(RespValue::NullArray.serialize(), b"*-1\r\n");
    }

    #[test]
    fn test_array_count_line_is_terminated() {
        let value = RespValue::command(["SET", "foo", "bar"]);
        assert_eq!(
            value.serialize(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"
        );
    }

    #[test]
    fn test_nested_arrays() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![RespValue::integer(2), RespValue::NullArray]),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n:1\r\n*2\r\n:2\r\n*-1\r\n");
    }

    #[test]
    fn test_serialize_into_appends() {
        let mut buf = b"prefix".to_vec();
        RespValue::ok().serialize_into(&mut buf);
        assert_eq!(buf, b"prefix+OK\r\n");
    }

    #[test]
    fn test_display() {
        assert_eq!(RespValue::NullBulkString.to_string(), "nil");
        assert_eq!(
            RespValue::command(["GET", "k"]).to_string(),
            "[\"GET\", \"k\"]"
        );
        assert_eq!(
            RespValue::bulk_string(Bytes::from_static(&[0xff, 0xfe])).to_string(),
            "<2 bytes>"
        );
    }
}
