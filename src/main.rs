//! snapkv - An In-Memory Key-Value Server with Snapshot Persistence
//!
//! This is the main entry point for the snapkv server.
//! It restores the last snapshot, binds the TCP listener, serves clients
//! until a shutdown signal arrives, and writes a final snapshot.

use anyhow::Context;
use clap::Parser;
use snapkv::server::{shutdown_signal, Server};
use snapkv::{CommandHandler, Config, SnapshotStore, StorageEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config, address: &str) {
    println!(
        r#"
snapkv v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Listening on {}
Snapshot file {}

Use Ctrl+C to shutdown gracefully.
"#,
        snapkv::VERSION,
        address,
        config.snapshot_path.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and environment
    let config = Config::parse();

    // Set up logging
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log filter '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());
    let snapshots = Arc::new(SnapshotStore::new(&config.snapshot_path));

    match snapshots.load(&storage) {
        Ok(keys) => info!(keys, "Storage engine initialized"),
        Err(e) => warn!(
            error = %e,
            path = %config.snapshot_path.display(),
            "Could not restore snapshot, starting with an empty store"
        ),
    }

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    let address = listener.local_addr()?.to_string();
    info!(address = %address, "Listening");

    print_banner(&config, &address);

    let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&snapshots));
    Server::new(listener, handler, config.server_settings())
        .run(shutdown_signal())
        .await;

    if config.no_save_on_shutdown {
        info!("Skipping final snapshot");
    } else if let Err(e) = snapshots.save(&storage) {
        error!(error = %e, "Final snapshot failed");
    }

    let stats = storage.stats();
    info!(
        keys = stats.keys,
        gets = stats.get_ops,
        sets = stats.set_ops,
        expired = stats.expired,
        "Server shutdown complete"
    );
    Ok(())
}
