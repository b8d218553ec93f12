//! Command Dispatch
//!
//! Turns a decoded request array into exactly one reply. The first element
//! names the command (matched case-insensitively) and the rest are its
//! arguments. Malformed requests, wrong arity, storage failures and
//! unknown commands all come back as `-ERR ...` replies, never as a
//! dropped connection.
//!
//! | command | arguments | reply |
//! |---|---|---|
//! | `PING` | none | bulk `PONG` |
//! | `ECHO` | message | bulk message |
//! | `SET` | key value \[`EX`\|`PX`\|`EXAT`\|`PXAT` n\] | `+OK` |
//! | `GET` | key | the value |
//! | `EXISTS` | key... | count of live keys |
//! | `DEL` | key... | count removed |
//! | `SAVE` | none | `+OK` after the snapshot is on disk |
//! | `CONFIG` | anything | `+OK` |
//!
//! The engine lock is released before the reply is built, so encoding and
//! socket writes never happen while holding it.

pub mod handler;

pub use handler::{CommandError, CommandHandler, CommandResult};
