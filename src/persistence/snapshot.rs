//! Snapshot file encoding and atomic replacement.

use crate::storage::{Entry, SnapshotEntry, StorageEngine};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// TTL field value for keys without expiry.
pub const NO_EXPIRY: i64 = -1;

/// Errors from saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    /// Third field of a record is not an integer, or is too far in the
    /// future to represent
    #[error("invalid ttl on snapshot line {line}")]
    InvalidTtl { line: usize },
}

/// Saves and restores a [`StorageEngine`] through one snapshot file.
///
/// Saves go to `<path>.tmp` first and are renamed over `<path>`, so the
/// temporary file always lives in the same directory as the real one.
/// Concurrent saves are serialized so they never share the temporary file.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    /// The canonical snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The scratch file a save writes before renaming.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Writes every live key to disk.
    ///
    /// # Returns
    ///
    /// The number of keys written.
    pub fn save(&self, engine: &StorageEngine) -> Result<usize, SnapshotError> {
        let _guard = self.lock_saves();
        let entries = engine.snapshot();
        let data = encode_snapshot(&entries);

        persist_atomic(&self.path, &self.temp_path(), &data)?;

        info!(keys = entries.len(), path = %self.path.display(), "Snapshot saved");
        Ok(entries.len())
    }

    /// Blocks saves until the guard is dropped.
    pub(crate) fn lock_saves(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock()
    }

    /// Replaces the engine's contents with the snapshot on disk.
    ///
    /// A missing file is not an error: the engine is left as it is and
    /// `Ok(0)` is returned. If any record is invalid the engine is not
    /// touched at all.
    ///
    /// # Returns
    ///
    /// The number of keys restored.
    pub fn load(&self, engine: &StorageEngine) -> Result<usize, SnapshotError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot file, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let entries = decode_snapshot(&data)?;
        let restored = engine.restore(entries);

        info!(keys = restored, path = %self.path.display(), "Snapshot restored");
        Ok(restored)
    }
}

/// Encodes entries as `key,value,ttl` lines.
pub fn encode_snapshot(entries: &[SnapshotEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * 32);

    for entry in entries {
        escape_into(&mut buf, &entry.key);
        buf.push(b',');
        escape_into(&mut buf, &entry.value);
        buf.push(b',');
        buf.extend_from_slice(ttl_field(entry.ttl).to_string().as_bytes());
        buf.push(b'\n');
    }

    buf
}

/// Decodes snapshot bytes into entries ready for [`StorageEngine::restore`].
///
/// Lines that do not have exactly three fields, or that carry an empty key
/// or value, are skipped. A TTL that is not an integer fails the whole
/// decode, and so does a TTL whose expiry instant cannot be represented.
/// A TTL of zero or below means the key never expires.
pub fn decode_snapshot(data: &[u8]) -> Result<Vec<(Bytes, Entry)>, SnapshotError> {
    let now = Instant::now();
    let mut entries = Vec::new();

    for (index, raw) in data.split(|&b| b == b'\n').enumerate() {
        let line = index + 1;
        let record = raw.strip_suffix(b"\r").unwrap_or(raw);
        if record.is_empty() {
            continue;
        }

        let [key, value, ttl] = match <[Vec<u8>; 3]>::try_from(split_fields(record)) {
            Ok(fields) => fields,
            Err(fields) => {
                debug!(line, fields = fields.len(), "Skipping malformed snapshot line");
                continue;
            }
        };

        let ttl = parse_ttl(&ttl).ok_or(SnapshotError::InvalidTtl { line })?;

        if key.is_empty() || value.is_empty() {
            debug!(line, "Skipping snapshot line with empty key or value");
            continue;
        }

        let expires_at = match ttl {
            Some(ttl) => Some(now.checked_add(ttl).ok_or(SnapshotError::InvalidTtl { line })?),
            None => None,
        };
        let entry = Entry {
            value: Bytes::from(value),
            expires_at,
        };
        entries.push((Bytes::from(key), entry));
    }

    Ok(entries)
}

/// Writes `data` to `temp_path`, flushes it to disk and renames it over
/// `path`.
///
/// If any step fails the temporary file is removed and `path` keeps its
/// previous contents.
pub fn persist_atomic(path: &Path, temp_path: &Path, data: &[u8]) -> io::Result<()> {
    let result = write_synced(temp_path, data).and_then(|()| fs::rename(temp_path, path));

    if result.is_err() {
        let _ = fs::remove_file(temp_path);
    }
    result
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Whole seconds left, rounded up so a live key never reads as "no expiry".
fn ttl_field(ttl: Option<Duration>) -> i64 {
    match ttl {
        None => NO_EXPIRY,
        Some(ttl) => {
            let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
            i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
        }
    }
}

/// `None` for a non-integer field, `Some(None)` for no expiry.
fn parse_ttl(field: &[u8]) -> Option<Option<Duration>> {
    let text = std::str::from_utf8(field).ok()?.trim();
    if text.is_empty() {
        return Some(None);
    }

    let secs: i64 = text.parse().ok()?;
    if secs <= 0 {
        Some(None)
    } else {
        Some(Some(Duration::from_secs(secs as u64)))
    }
}

fn escape_into(buf: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        match b {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b',' => buf.extend_from_slice(b"\\,"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            _ => buf.push(b),
        }
    }
}

/// Splits a record on unescaped commas, unescaping each field.
fn split_fields(record: &[u8]) -> Vec<Vec<u8>> {
    let mut fields = Vec::with_capacity(3);
    let mut current = Vec::new();
    let mut bytes = record.iter().copied();

    while let Some(b) = bytes.next() {
        match b {
            b'\\' => match bytes.next() {
                Some(b'n') => current.push(b'\n'),
                Some(b'r') => current.push(b'\r'),
                Some(other) => current.push(other),
                None => current.push(b'\\'),
            },
            b',' => fields.push(std::mem::take(&mut current)),
            _ => current.push(b),
        }
    }
    fields.push(current);

    fields
}
