//! # snapkv - An In-Memory Key-Value Server with Snapshot Persistence
//!
//! snapkv speaks a RESP-compatible wire protocol over TCP, keeps all data in
//! one shared in-memory map, expires keys lazily, and persists the whole map
//! to a text snapshot on `SAVE` and at shutdown.
//!
//! ## Features
//!
//! - **Redis-Compatible Wire Format**: Any RESP client can talk to it
//! - **Concurrent Access**: One reader/writer lock, never held across I/O
//! - **Expiry**: `EX`, `PX`, `EXAT` and `PXAT` on `SET`, enforced on read
//! - **Snapshots**: Atomic write-then-rename, restored on startup
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Request Path
//!
//! ```text
//! TcpListener ─ accept ─> connection task ─ decode ─> CommandHandler
//!   (server)                (connection)    (protocol)  (commands)
//!                                                            │
//!                       SnapshotStore <── SAVE ──────── StorageEngine
//!                       (persistence)                   (storage)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use snapkv::server::{Server, ServerSettings};
//! use snapkv::{CommandHandler, SnapshotStore, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let snapshots = Arc::new(SnapshotStore::new("datastore.rdb"));
//!     snapshots.load(&storage)?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&snapshots));
//!
//!     Server::new(listener, handler, ServerSettings::default())
//!         .run(snapkv::server::shutdown_signal())
//!         .await;
//!
//!     snapshots.save(&storage)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-milliseconds]`
//! - `GET key`
//! - `EXISTS key [key ...]`
//! - `DEL key [key ...]`
//! - `SAVE`
//! - `CONFIG ...` (accepted, no effect)
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value type, encoder and incremental decoder
//! - [`storage`]: Thread-safe storage engine and expiry policies
//! - [`persistence`]: Snapshot file format and atomic save/restore
//! - [`commands`]: Command dispatcher
//! - [`connection`]: Per-client read/execute/reply loop
//! - [`server`]: Accept loop and graceful shutdown
//! - [`config`]: Command-line and environment configuration
//!
//! ## Design Highlights
//!
//! ### Lazy Expiry
//!
//! Expired keys are removed only when `GET` or `EXISTS` touches them, so a
//! read may mutate the map. There is no background sweeper.
//!
//! ### Consistent Snapshots
//!
//! A snapshot is copied out of the map under one read lock, then encoded and
//! written with no lock held. Writers are blocked only for the copy.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::SnapshotStore;
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerSettings};
pub use storage::StorageEngine;

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 6379;

/// Interface used when none is configured
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
