//! Load generator for a running snapkv server.
//!
//! Writes `key1..keyN` with `SET ... EX <ttl>`, then reads every key back
//! with `GET`. Each request uses a fresh connection, and at most
//! `--concurrency` requests are in flight at once.

use anyhow::{bail, Context};
use bytes::BytesMut;
use clap::Parser;
use snapkv::protocol::{RespParser, RespValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Deadline for each reply
const READ_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "snapkv-loadgen", version, about = "Issue SET/GET load against a snapkv server")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:6379")]
    addr: String,

    /// Number of keys to write and then read
    #[arg(long, default_value_t = 10_000)]
    keys: usize,

    /// Maximum requests in flight
    #[arg(long, default_value_t = 50)]
    concurrency: usize,

    /// Expiry given to every key, in seconds
    #[arg(long, default_value_t = 3600)]
    ttl: u64,
}

#[derive(Debug, Default)]
struct PhaseReport {
    ok: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if args.concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    let addr: Arc<str> = Arc::from(args.addr.as_str());
    let limit = Arc::new(Semaphore::new(args.concurrency));
    let started = Instant::now();

    let ttl = args.ttl.to_string();
    let sets = run_phase("SET", args.keys, &addr, &limit, |i| {
        let value = (i * 7919 % 10_000).to_string();
        RespValue::command([
            "SET".to_string(),
            format!("key{}", i),
            value,
            "EX".to_string(),
            ttl.clone(),
        ])
    })
    .await;

    let gets = run_phase("GET", args.keys, &addr, &limit, |i| {
        RespValue::command(["GET".to_string(), format!("key{}", i)])
    })
    .await;

    info!(
        sets_ok = sets.ok,
        sets_failed = sets.failed,
        gets_ok = gets.ok,
        gets_failed = gets.failed,
        elapsed = ?started.elapsed(),
        "Load test finished"
    );
    Ok(())
}

/// Sends `count` requests built by `make_request`, bounded by `limit`.
async fn run_phase(
    name: &'static str,
    count: usize,
    addr: &Arc<str>,
    limit: &Arc<Semaphore>,
    make_request: impl Fn(usize) -> RespValue,
) -> PhaseReport {
    let mut tasks = JoinSet::new();
    let started = Instant::now();

    for i in 1..=count {
        let permit = match Arc::clone(limit).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let request = make_request(i).serialize();
        let addr = Arc::clone(addr);

        tasks.spawn(async move {
            let result = round_trip(&addr, &request).await;
            drop(permit);
            result
        });
    }

    let mut report = PhaseReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(reply)) if !reply.is_error() => {
                debug!(reply = %reply, "{} ok", name);
                report.ok += 1;
            }
            Ok(Ok(reply)) => {
                warn!(reply = %reply, "{} rejected", name);
                report.failed += 1;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "{} failed", name);
                report.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "{} task panicked", name);
                report.failed += 1;
            }
        }
    }

    info!(
        phase = name,
        ok = report.ok,
        failed = report.failed,
        elapsed = ?started.elapsed(),
        "Phase complete"
    );
    report
}

/// Opens a connection, sends one request and waits for one reply.
async fn round_trip(addr: &str, request: &[u8]) -> anyhow::Result<RespValue> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to {}", addr))?;
    stream.write_all(request).await.context("send request")?;

    tokio::time::timeout(READ_DEADLINE, read_reply(&mut stream))
        .await
        .context("reply deadline exceeded")?
}

/// Reads until one complete value has arrived.
async fn read_reply(stream: &mut TcpStream) -> anyhow::Result<RespValue> {
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(1024);

    loop {
        if let Some((reply, _)) = parser.parse(&buffer)? {
            return Ok(reply);
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            bail!("connection closed before a full reply");
        }
    }
}
