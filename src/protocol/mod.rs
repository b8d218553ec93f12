//! Wire Codec
//!
//! This module is the codec between raw connection bytes and typed values.
//! It knows nothing about commands or storage.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` enum and its encoder
//! - `parser`: incremental decoder for request bytes
//!
//! ## Example
//!
//! ```
//! use snapkv::protocol::{decode, RespValue};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = decode(data).unwrap();
//! assert_eq!(value, RespValue::command(["GET", "name"]));
//! assert_eq!(consumed, data.len());
//!
//! let response = RespValue::simple_string("OK");
//! assert_eq!(response.serialize(), b"+OK\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode, parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
