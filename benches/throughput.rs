//! Throughput Benchmark for snapkv
//!
//! This benchmark measures the storage engine under various workloads,
//! the RESP codec, and snapshot encoding.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use snapkv::persistence::{decode_snapshot, encode_snapshot};
use snapkv::protocol::{RespParser, RespValue};
use snapkv::storage::StorageEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        let value = Bytes::from("small_value");
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, value.clone(), None).unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, value.clone(), None).unwrap();
            i += 1;
        });
    });

    group.bench_function("set_with_expiry", |b| {
        let mut i = 0u64;
        let value = Bytes::from("value");
        b.iter(|| {
            let key = Bytes::from(format!("ttl:{}", i));
            let expires_at = Instant::now() + Duration::from_secs(3600);
            engine.set(key, value.clone(), Some(expires_at)).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    // Pre-populate with data
    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        engine.set(key, value, None).unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            let _ = black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            let _ = black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    // Pre-populate
    for i in 0..10_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        engine.set(key, value, None).unwrap();
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                let key = Bytes::from(format!("new:{}", i));
                engine.set(key, Bytes::from("value"), None).unwrap();
            } else {
                // 80% reads
                let key = format!("key:{}", i % 10_000);
                let _ = black_box(engine.get(key.as_bytes()));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            engine.set(key.clone(), Bytes::from("value"), None).unwrap();
                            let _ = engine.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.len());
        });
    });

    group.finish();
}

/// Benchmark the RESP codec
fn bench_codec(c: &mut Criterion) {
    let set = RespValue::command(["SET", "user:1000", "some moderately sized value"]).serialize();
    let pipeline: Vec<u8> = set.iter().copied().cycle().take(set.len() * 100).collect();

    let mut group = c.benchmark_group("codec");

    group.throughput(Throughput::Bytes(set.len() as u64));
    group.bench_function("parse_set", |b| {
        let mut parser = RespParser::new();
        b.iter(|| black_box(parser.parse(black_box(&set)).unwrap()));
    });

    group.throughput(Throughput::Elements(100));
    group.bench_function("parse_pipeline_100", |b| {
        let mut parser = RespParser::new();
        b.iter(|| {
            let mut input = &pipeline[..];
            while let Some((value, consumed)) = parser.parse(input).unwrap() {
                black_box(value);
                input = &input[consumed..];
            }
        });
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("serialize_bulk", |b| {
        let value = RespValue::bulk_string(Bytes::from("x".repeat(1024)));
        let mut buf = Vec::with_capacity(2048);
        b.iter(|| {
            buf.clear();
            value.serialize_into(&mut buf);
            black_box(buf.len());
        });
    });

    group.finish();
}

/// Benchmark snapshot encoding and decoding
fn bench_snapshot(c: &mut Criterion) {
    let engine = StorageEngine::new();
    for i in 0..10_000 {
        let expires_at = (i % 2 == 0).then(|| Instant::now() + Duration::from_secs(3600));
        engine
            .set(
                Bytes::from(format!("key:{}", i)),
                Bytes::from(format!("value,{}", i)),
                expires_at,
            )
            .unwrap();
    }

    let mut group = c.benchmark_group("snapshot");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("encode_10k", |b| {
        b.iter(|| black_box(encode_snapshot(&engine.snapshot())));
    });

    let encoded = encode_snapshot(&engine.snapshot());
    group.bench_function("decode_10k", |b| {
        b.iter(|| black_box(decode_snapshot(&encoded).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_concurrent,
    bench_codec,
    bench_snapshot,
);

criterion_main!(benches);
