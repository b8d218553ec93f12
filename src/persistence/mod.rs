//! Snapshot Persistence
//!
//! The whole key space is written to a single text file and read back on
//! startup. One record per line:
//!
//! ```text
//! key,value,ttl
//! ```
//!
//! `ttl` is the remaining lifetime in whole seconds, or `-1` for a key that
//! never expires. Backslash, comma, CR and LF inside keys and values are
//! escaped as `\\`, `\,`, `\r` and `\n`.
//!
//! ## Write Path
//!
//! ```text
//! StorageEngine::snapshot()  ──►  encode_snapshot()  ──►  <path>.tmp
//!                                                             │ sync_all
//!                                                             ▼
//!                                                   rename ──► <path>
//! ```
//!
//! Readers of `<path>` only ever see a complete file.

pub mod snapshot;

pub use snapshot::{decode_snapshot, encode_snapshot, persist_atomic, SnapshotError, SnapshotStore};
