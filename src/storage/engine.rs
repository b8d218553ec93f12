//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key space of snapkv: a map from key to
//! [`Entry`], where each entry may carry an expiry instant.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: The whole map sits behind a single reader/writer lock.
//!    Snapshots need a consistent view of every key at once, and a single
//!    lock gives exactly that.
//! 2. **Lazy Expiry**: Expired entries are removed when a read touches them.
//!    `get` and `exists_many` may therefore mutate the map.
//! 3. **Short critical sections**: The lock is held for one map operation
//!    and released before the caller does anything else (encoding, I/O).
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                StorageEngine               │
//! │  ┌──────────────────────────────────────┐  │
//! │  │ RwLock<HashMap<Bytes, Entry>>        │  │
//! │  │   readers: get / exists / snapshot   │  │
//! │  │   writers: set / delete / restore    │  │
//! │  │            lazy-expiry eviction      │  │
//! │  └──────────────────────────────────────┘  │
//! └────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by storage operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// SET with an empty key
    #[error("ERR key is empty")]
    EmptyKey,

    /// SET with an empty value
    #[error("ERR value is empty")]
    EmptyValue,

    /// The key is not in the map
    #[error("ERR key does not exist")]
    NotFound,

    /// The key was present but past its expiry; it has been removed
    #[error("ERR key has expired and was deleted")]
    Expired,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry that expires at the given instant.
    pub fn with_expiry(value: Bytes, expires_at: Instant) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Creates a new entry with TTL.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self::with_expiry(value, Instant::now() + ttl)
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Time left before expiry, `None` if the entry never expires.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(now))
    }
}

/// A live entry copied out of the map by [`StorageEngine::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Bytes,
    /// Time left before expiry at the moment of the snapshot
    pub ttl: Option<Duration>,
}

/// The main storage engine for snapkv.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks and the snapshot subsystem. Every operation
/// takes the lock itself; callers never see the map.
///
/// # Example
///
/// ```
/// use snapkv::storage::{StorageEngine, StorageError};
/// use bytes::Bytes;
/// use std::time::{Duration, Instant};
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"), None).unwrap();
/// assert_eq!(engine.get(b"name"), Ok(Bytes::from("Ariz")));
///
/// // An expiry in the past is observed as expired, then the key is gone
/// engine.set(Bytes::from("old"), Bytes::from("x"), Some(Instant::now())).unwrap();
/// assert_eq!(engine.get(b"old"), Err(StorageError::Expired));
/// assert_eq!(engine.get(b"old"), Err(StorageError::NotFound));
/// ```
pub struct StorageEngine {
    data: RwLock<HashMap<Bytes, Entry>>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: total keys removed by DEL
    del_count: AtomicU64,

    /// Statistics: number of expired keys cleaned up
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Sets a key, replacing any existing entry and its expiry.
    ///
    /// `expires_at = None` stores the key without expiry. Empty keys and
    /// empty values are rejected and leave the map untouched.
    pub fn set(&self, key: Bytes, value: Bytes, expires_at: Option<Instant>) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        if value.is_empty() {
            return Err(StorageError::EmptyValue);
        }

        self.set_count.fetch_add(1, Ordering::Relaxed);

        let entry = Entry { value, expires_at };
        self.data.write().insert(key, entry);
        Ok(())
    }

    /// Gets the value for a key.
    ///
    /// An entry found past its expiry is deleted as a side effect of this
    /// call and reported as [`StorageError::Expired`]; later calls see
    /// [`StorageError::NotFound`].
    pub fn get(&self, key: &[u8]) -> StorageResult<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        // First, try a read lock (fast path for existing, non-expired keys)
        {
            let data = self.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(entry.value.clone()),
                Some(_) => {}
                None => return Err(StorageError::NotFound),
            }
        }

        // Key exists but is expired - need write lock to remove it
        let mut data = self.data.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                Err(StorageError::Expired)
            }
            // Race: another writer replaced the key between the two locks
            Some(entry) => Ok(entry.value.clone()),
            None => Err(StorageError::NotFound),
        }
    }

    /// Counts how many of the given keys exist and are unexpired.
    ///
    /// Duplicates count once per occurrence. Expired entries met along the
    /// way are deleted and not counted.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        let mut count = 0;
        let mut stale = Vec::new();

        {
            let data = self.data.read();
            let now = Instant::now();
            for key in keys {
                match data.get(key) {
                    Some(entry) if entry.is_expired_at(now) => stale.push(key),
                    Some(_) => count += 1,
                    None => {}
                }
            }
        }

        if !stale.is_empty() {
            let mut data = self.data.write();
            for key in stale {
                // Re-check: the key may have been rewritten since the read
                if data.get(key).is_some_and(Entry::is_expired) {
                    data.remove(key);
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        count
    }

    /// Deletes keys regardless of their expiry state.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were actually removed.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        let mut data = self.data.write();
        let deleted = keys.iter().filter(|k| data.remove(*k).is_some()).count() as u64;
        self.del_count.fetch_add(deleted, Ordering::Relaxed);
        deleted
    }

    /// Returns true if the key is physically in the map, expired or not.
    ///
    /// Lazy expiry makes this differ from `exists_many`: an expired key
    /// stays resident until something reads it.
    pub fn is_resident(&self, key: &[u8]) -> bool {
        self.data.read().contains_key(key)
    }

    /// Copies every unexpired entry out of the map.
    ///
    /// The copy is taken under one read lock, so it reflects a single
    /// point in time: no write is half-visible in it.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let data = self.data.read();
        let now = Instant::now();

        data.iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| SnapshotEntry {
                key: key.clone(),
                value: entry.value.clone(),
                ttl: entry.remaining(now),
            })
            .collect()
    }

    /// Replaces the entire contents of the map.
    ///
    /// # Returns
    ///
    /// Returns the number of keys now stored.
    pub fn restore(&self, entries: impl IntoIterator<Item = (Bytes, Entry)>) -> usize {
        let restored: HashMap<Bytes, Entry> = entries.into_iter().collect();
        let mut data = self.data.write();
        *data = restored;
        data.len()
    }

    /// Returns the number of resident keys (expired ones not yet evicted included).
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}
