//! Connection Handler Module
//!
//! Drives one client from accept to close. The server spawns one task per
//! accepted socket, and every task shares the same `CommandHandler`.
//!
//! ## Lifecycle
//!
//! ```text
//!  accept ──> read ──> decode ──┬─ complete ──> execute ──> write ──┐
//!              ▲                ├─ partial  ──────────────────────────┤
//!              │                └─ invalid  ──> -ERR reply ──> close  │
//!              └──────────────────────────────────────────────────────┘
//!
//!  read returns 0 bytes        ──> close
//!  no bytes within the timeout ──> close
//!  shutdown while idle         ──> close
//! ```
//!
//! Several requests arriving in one read are all answered, in order,
//! before the next read. A request split over many reads is buffered
//! until it is complete.
//!
//! ## Example
//!
//! ```ignore
//! use snapkv::connection::{handle_connection, ConnectionStats};
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(
//!     stream,
//!     addr,
//!     handler.clone(),
//!     Arc::clone(&stats),
//!     Duration::from_secs(30),
//!     shutdown_rx.clone(),
//! ));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, shutdown_signalled, ConnectionError, ConnectionHandler, ConnectionStats,
};
