//! Storage Engine Module
//!
//! This module provides the in-memory key space of snapkv: a thread-safe
//! map of byte keys to byte values, where each key may carry an expiry.
//!
//! ## Architecture
//!
//! ```text
//!   client tasks ──┐                     ┌── SAVE / shutdown
//!                  ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │          RwLock<HashMap<Bytes, Entry{value, expiry}>>       │
//! └─────────────────────────────────────────────────────────────┘
//!                  ▲
//!                  │ Instant
//!      ┌───────────┴───────────┐
//!      │  expiry::resolve_*    │  EX / PX / EXAT / PXAT
//!      └───────────────────────┘
//! ```
//!
//! `GET` and `EXISTS` take the read lock and upgrade only to delete an
//! expired key. `SET`, `DEL` and restores take the write lock. A snapshot
//! copy holds the read lock for one pass over the map.
//!
//! ## Example
//!
//! ```
//! use snapkv::storage::{resolve_expiry, StorageEngine};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"), None).unwrap();
//! assert_eq!(engine.get(b"name"), Ok(Bytes::from("Ariz")));
//!
//! // Set with an expiry policy
//! let expires_at = resolve_expiry(Some("EX"), Some("3600")).unwrap();
//! engine
//!     .set(Bytes::from("session"), Bytes::from("token123"), Some(expires_at))
//!     .unwrap();
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, SnapshotEntry, StorageEngine, StorageError, StorageResult, StorageStats};
pub use expiry::{resolve_expiry, ExpiryError, ExpiryPolicy};
