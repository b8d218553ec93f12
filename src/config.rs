//! Server configuration.
//!
//! Every option can be given on the command line or through an environment
//! variable; the command line wins.

use crate::server::ServerSettings;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the snapshot file
pub const DEFAULT_SNAPSHOT_PATH: &str = "datastore.rdb";

/// snapkv - an in-memory key-value server with snapshot persistence
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "snapkv", version, about)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "SNAPKV_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "SNAPKV_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Snapshot file written by SAVE and at shutdown, read at startup
    #[arg(long, env = "SNAPKV_SNAPSHOT_PATH", default_value = DEFAULT_SNAPSHOT_PATH)]
    pub snapshot_path: PathBuf,

    /// Seconds a connection may stay silent before it is closed
    #[arg(long, env = "SNAPKV_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// Seconds open connections get to finish after a shutdown signal
    #[arg(long, env = "SNAPKV_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Do not write a snapshot when shutting down
    #[arg(long, env = "SNAPKV_NO_SAVE_ON_SHUTDOWN")]
    pub no_save_on_shutdown: bool,

    /// Log filter, e.g. `info` or `snapkv=debug`
    #[arg(long, env = "SNAPKV_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["snapkv"]).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.snapshot_path, PathBuf::from("datastore.rdb"));
        assert!(!config.no_save_on_shutdown);
        assert_eq!(
            config.server_settings().read_timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_flags() {
        let config = Config::try_parse_from([
            "snapkv",
            "--host",
            "0.0.0.0",
            "-p",
            "6380",
            "--snapshot-path",
            "/tmp/kv.rdb",
            "--shutdown-grace-secs",
            "1",
            "--no-save-on-shutdown",
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.snapshot_path, PathBuf::from("/tmp/kv.rdb"));
        assert_eq!(
            config.server_settings().shutdown_grace,
            Duration::from_secs(1)
        );
        assert!(config.no_save_on_shutdown);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Config::try_parse_from(["snapkv", "--port", "http"]).is_err());
    }
}
