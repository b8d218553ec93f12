//! Per-client request loop.
//!
//! Bytes are accumulated in a `BytesMut` until the decoder reports a
//! complete value. Every complete request in the buffer is answered, in
//! arrival order, before the next read. A read that waits longer than the
//! configured timeout ends the connection, and so does a shutdown signal
//! that arrives while no request is half-received.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

/// One maximal bulk string plus room for its framing
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    /// Connections closed because of malformed input
    pub protocol_errors: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// State for one connected client.
///
/// Generic over the byte stream so tests can drive it with in-memory pipes.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    addr: SocketAddr,
    /// Received bytes not yet decoded
    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
    /// Limit on each individual read
    read_timeout: Duration,
    /// Flips to `true` when the server is shutting down
    shutdown: watch::Receiver<bool>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Registers the connection in `stats`. It is unregistered when
    /// [`run`](Self::run) returns.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        read_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
            read_timeout,
            shutdown,
        }
    }

    /// Serves the client until it disconnects, misbehaves, times out, or
    /// the server shuts down while the connection is idle. Only the last
    /// case returns `Ok`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Closed for shutdown"),
            Err(ConnectionError::ReadTimeout(after)) => {
                debug!(client = %self.addr, timeout = ?after, "Read timed out")
            }
            Err(e) if e.is_routine() => debug!(client = %self.addr, error = %e, "Client gone"),
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Drain every complete command already buffered
            loop {
                let command = match self.try_parse_command() {
                    Ok(Some(command)) => command,
                    Ok(None) => break,
                    Err(e) => {
                        // The stream cannot be re-synchronised after bad framing
                        self.stats.protocol_error();
                        let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                        self.send_response(&reply).await?;
                        return Err(ConnectionError::ParseError(e));
                    }
                };

                let response = self.command_handler.execute(command).await;
                self.stats.command_processed();

                self.send_response(&response).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Decodes the next buffered request, if one is complete.
    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                self.buffer.advance(consumed);
                trace!(client = %self.addr, consumed, remaining = self.buffer.len(), "Decoded request");
                Ok(Some(value))
            }
            Ok(None) => {
                trace!(client = %self.addr, buffered = self.buffer.len(), "Waiting for the rest of a request");
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Malformed request");
                Err(e)
            }
        }
    }

    /// `Ok(true)` once new bytes are buffered, `Ok(false)` when the server
    /// is shutting down and no request is in progress.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "Request exceeds buffer limit");
            return Err(ConnectionError::BufferFull);
        }

        // A half-received request is finished before honouring shutdown
        let idle = self.buffer.is_empty();
        let stopping = *self.shutdown.borrow();
        if idle && stopping {
            return Ok(false);
        }

        self.buffer.reserve(INITIAL_BUFFER_SIZE);

        let read = tokio::time::timeout(
            self.read_timeout,
            self.stream.get_mut().read_buf(&mut self.buffer),
        );

        let n = tokio::select! {
            result = read => match result {
                Ok(n) => n?,
                Err(_) => return Err(ConnectionError::ReadTimeout(self.read_timeout)),
            },
            _ = shutdown_signalled(&mut self.shutdown), if idle => return Ok(false),
        };

        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::ClientDisconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Received");

        Ok(true)
    }

    /// Writes and flushes one reply.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let encoded = response.serialize();
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(encoded.len());
        trace!(client = %self.addr, bytes = encoded.len(), "Replied");
        Ok(())
    }
}

/// Why a connection ended. Each one ends only the connection it happened on.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request. The client has already been sent an error reply.
    #[error("protocol error: {0}")]
    ParseError(#[from] ParseError),

    /// Clean close between requests
    #[error("client disconnected")]
    ClientDisconnected,

    /// Close in the middle of a request
    #[error("connection closed mid-request")]
    UnexpectedEof,

    #[error("request larger than the buffer limit")]
    BufferFull,

    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),
}

impl ConnectionError {
    /// Endings that need no operator attention.
    fn is_routine(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected | ConnectionError::ReadTimeout(_) => true,
            ConnectionError::IoError(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
            _ => false,
        }
    }
}

/// Resolves once the shutdown flag is `true` or its sender is gone.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Runs a [`ConnectionHandler`] to completion, swallowing the ordinary
/// ways a connection ends.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    read_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, read_timeout, shutdown);
    if let Err(e) = handler.run().await {
        if !e.is_routine() {
            debug!(client = %addr, error = %e, "Connection ended with error");
        }
    }
}
