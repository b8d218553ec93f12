//! TCP Server
//!
//! Owns the listening socket and every connection task spawned from it.
//!
//! ```text
//!            accept()                      shutdown future resolves
//! listener ───────────► JoinSet<conn> ─────────────────────────────┐
//!                         │                                        ▼
//!                         │ watch::Sender<bool> ── true ──► idle connections exit
//!                         ▼
//!                wait up to `shutdown_grace`, then abort the rest
//! ```
//!
//! The loop blocks only on `accept`; request work happens in the spawned
//! tasks.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Timing knobs for the server.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Deadline for each read on a client connection
    pub read_timeout: Duration,
    /// How long open connections may keep running after shutdown starts
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Accepts clients and runs one task per connection.
pub struct Server {
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    settings: ServerSettings,
}

impl Server {
    pub fn new(listener: TcpListener, handler: CommandHandler, settings: ServerSettings) -> Self {
        Self {
            listener,
            handler,
            stats: Arc::new(ConnectionStats::new()),
            settings,
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared connection statistics.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Serves clients until `shutdown` resolves, then drains connections.
    ///
    /// After `shutdown` resolves no new connection is accepted. Connections
    /// between requests close at once; a connection in the middle of a
    /// request gets to finish it, bounded by the grace period. Whatever is
    /// still running after that is aborted.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let Server {
            listener,
            handler,
            stats,
            settings,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!(client = %addr, "Accepted connection");
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            handler.clone(),
                            Arc::clone(&stats),
                            settings.read_timeout,
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                // Reap finished tasks so the set stays small
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                () = &mut shutdown => break,
            }
        }

        drop(listener);
        info!(open = connections.len(), "Stopped accepting connections");

        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(settings.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                grace = ?settings.shutdown_grace,
                "Grace period elapsed, aborting connections"
            );
            connections.shutdown().await;
        }

        info!(
            accepted = stats.connections_accepted.load(Ordering::Relaxed),
            commands = stats.commands_processed.load(Ordering::Relaxed),
            protocol_errors = stats.protocol_errors.load(Ordering::Relaxed),
            "Server stopped"
        );
    }
}

/// Resolves on Ctrl+C, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SnapshotStore;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn start(
        settings: ServerSettings,
    ) -> (SocketAddr, Arc<ConnectionStats>, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let storage = Arc::new(StorageEngine::new());
        let snapshots = Arc::new(SnapshotStore::new(
            std::env::temp_dir().join("snapkv-server-test.rdb"),
        ));
        let server = Server::new(listener, CommandHandler::new(storage, snapshots), settings);
        let addr = server.local_addr().unwrap();
        let stats = server.stats();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        (addr, stats, tx, task)
    }

    #[tokio::test]
    async fn test_serves_concurrent_clients() {
        let (addr, stats, _tx, _task) = start(ServerSettings::default()).await;

        let mut clients = Vec::new();
        for i in 0..8 {
            clients.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let request = format!("*2\r\n$4\r\nECHO\r\n$2\r\nc{}\r\n", i);
                client.write_all(request.as_bytes()).await.unwrap();

                let mut buf = [0u8; 8];
                client.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf, format!("$2\r\nc{}\r\n", i).as_bytes());
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting_and_closes_idle() {
        let (addr, _stats, tx, task) = start(ServerSettings::default()).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 10];
        idle.read_exact(&mut buf).await.unwrap();

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // The idle connection was closed by the server
        let n = idle.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_grace_period_aborts_stuck_connection() {
        let settings = ServerSettings {
            read_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(100),
        };
        let (addr, stats, tx, task) = start(settings).await;

        // Half a request: the connection is not idle, so it waits for the rest
        let mut stuck = TcpStream::connect(addr).await.unwrap();
        stuck.write_all(b"*2\r\n$4\r\nECHO\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        drop(stuck);
    }
}
