//! Command Handler Module
//!
//! This module implements the commands understood by snapkv.
//! It validates incoming RESP arrays and dispatches them to the storage
//! engine or the snapshot store.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection, replies `PONG`
//! - `ECHO message` - Echo message
//! - `SET key value [EX|PX|EXAT|PXAT n]` - Set a key, optionally with expiry
//! - `GET key` - Get a key's value
//! - `EXISTS key [key ...]` - Count keys that exist
//! - `DEL key [key ...]` - Delete keys
//! - `SAVE` - Write a snapshot to disk
//! - `CONFIG ...` - Accepted and ignored
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                           │        │        │
//! │                                           ▼        ▼        │
//! │                              StorageEngine  SnapshotStore   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::persistence::{SnapshotError, SnapshotStore};
use crate::protocol::RespValue;
use crate::storage::{resolve_expiry, ExpiryError, StorageEngine, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Errors produced while validating or executing a command.
///
/// None of these end the connection: each one is sent back to the client
/// as an error reply.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request is not an array
    #[error("ERR invalid command format")]
    InvalidRequest,

    #[error("ERR empty command")]
    EmptyCommand,

    /// First element is not a UTF-8 bulk string
    #[error("ERR invalid command name")]
    InvalidCommandName,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    /// Argument is not a string type
    #[error("ERR invalid {0}")]
    InvalidArgument(&'static str),

    #[error("ERR unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Expiry(#[from] ExpiryError),

    #[error("ERR {0}")]
    Snapshot(#[from] SnapshotError),

    /// The blocking save task panicked or was cancelled
    #[error("ERR snapshot task failed: {0}")]
    SaveAborted(String),
}

/// Result type for command execution.
pub type CommandResult = Result<RespValue, CommandError>;

/// Handles commands by dispatching them to the appropriate handlers.
///
/// Cheap to clone; every connection task holds its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
    /// Target of SAVE
    snapshots: Arc<SnapshotStore>,
}

impl CommandHandler {
    /// Creates a new command handler over the given engine and snapshot store.
    pub fn new(storage: Arc<StorageEngine>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { storage, snapshots }
    }

    /// Returns the storage engine this handler executes against.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Returns the snapshot store used by SAVE.
    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The parsed RESP value (should be an array)
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client. Failures are returned
    /// as `RespValue::Error`, never as a panic. Only `SAVE` awaits; every
    /// other command completes on the first poll.
    pub async fn execute(&self, command: RespValue) -> RespValue {
        match self.try_execute(command).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "Command failed");
                RespValue::error(e.to_string())
            }
        }
    }

    async fn try_execute(&self, command: RespValue) -> CommandResult {
        // Commands must be non-null arrays
        let args = command.into_array().ok_or(CommandError::InvalidRequest)?;
        let (name, args) = args.split_first().ok_or(CommandError::EmptyCommand)?;

        // Extract command name (first argument)
        let cmd_name = match name {
            RespValue::BulkString(s) => std::str::from_utf8(s)
                .map_err(|_| CommandError::InvalidCommandName)?
                .to_ascii_uppercase(),
            _ => return Err(CommandError::InvalidCommandName),
        };

        self.dispatch(&cmd_name, args).await
    }

    /// Dispatches a command to its handler.
    async fn dispatch(&self, cmd: &str, args: &[RespValue]) -> CommandResult {
        match cmd {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "EXISTS" => self.cmd_exists(args),
            "DEL" => self.cmd_del(args),
            "SAVE" => self.cmd_save(args).await,
            "CONFIG" => Ok(RespValue::ok()),
            _ => Err(CommandError::UnsupportedCommand(cmd.to_string())),
        }
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    /// Extracts bytes from a string-typed RESP value.
    fn get_bytes(&self, value: &RespValue, what: &'static str) -> Result<Bytes, CommandError> {
        match value {
            RespValue::BulkString(b) => Ok(b.clone()),
            RespValue::SimpleString(s) => Ok(Bytes::from(s.clone())),
            _ => Err(CommandError::InvalidArgument(what)),
        }
    }

    /// Extracts a UTF-8 string from a RESP value.
    fn get_string<'a>(&self, value: &'a RespValue, what: &'static str) -> Result<&'a str, CommandError> {
        value.as_str().ok_or(CommandError::InvalidArgument(what))
    }

    fn get_keys(&self, args: &[RespValue]) -> Result<Vec<Bytes>, CommandError> {
        args.iter().map(|arg| self.get_bytes(arg, "key")).collect()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// PING
    fn cmd_ping(&self, args: &[RespValue]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("PING"));
        }
        Ok(RespValue::bulk_string(Bytes::from_static(b"PONG")))
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[RespValue]) -> CommandResult {
        match args {
            [message] => Ok(RespValue::bulk_string(self.get_bytes(message, "message")?)),
            _ => Err(CommandError::WrongArity("ECHO")),
        }
    }

    /// SET key value [EX seconds | PX milliseconds | EXAT unix-secs | PXAT unix-ms]
    fn cmd_set(&self, args: &[RespValue]) -> CommandResult {
        let (key, value, expiry) = match args {
            [key, value] => (key, value, None),
            [key, value, policy, amount] => (key, value, Some((policy, amount))),
            _ => return Err(CommandError::WrongArity("SET")),
        };

        let key = self.get_bytes(key, "key")?;
        let value = self.get_bytes(value, "value")?;

        let expires_at = match expiry {
            Some((policy, amount)) => {
                let policy = self.get_string(policy, "expiry policy")?;
                let amount = self.get_string(amount, "expire time")?;
                Some(resolve_expiry(Some(policy), Some(amount))?)
            }
            None => None,
        };

        self.storage.set(key, value, expires_at)?;
        Ok(RespValue::ok())
    }

    /// GET key
    ///
    /// Text values come back as a simple string; values that cannot be one
    /// (binary, or containing CR/LF) come back as a bulk string.
    fn cmd_get(&self, args: &[RespValue]) -> CommandResult {
        let key = match args {
            [key] => self.get_bytes(key, "key")?,
            _ => return Err(CommandError::WrongArity("GET")),
        };

        let value = self.storage.get(&key)?;

        match std::str::from_utf8(&value) {
            Ok(text) if !text.contains(['\r', '\n']) => Ok(RespValue::simple_string(text)),
            _ => Ok(RespValue::bulk_string(value)),
        }
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[RespValue]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("EXISTS"));
        }

        let keys = self.get_keys(args)?;
        Ok(RespValue::integer(self.storage.exists_many(&keys) as i64))
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[RespValue]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("DEL"));
        }

        let keys = self.get_keys(args)?;
        Ok(RespValue::integer(self.storage.delete_many(&keys) as i64))
    }

    /// SAVE
    ///
    /// Encoding and the fsync run on the blocking pool, so other
    /// connections keep being served while the file is written.
    async fn cmd_save(&self, args: &[RespValue]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("SAVE"));
        }

        let storage = Arc::clone(&self.storage);
        let snapshots = Arc::clone(&self.snapshots);
        let saved = tokio::task::spawn_blocking(move || snapshots.save(&storage))
            .await
            .map_err(|e| CommandError::SaveAborted(e.to_string()))?;

        saved.map_err(|e| {
            error!(error = %e, path = %self.snapshots.path().display(), "SAVE failed");
            e
        })?;
        Ok(RespValue::ok())
    }
}
