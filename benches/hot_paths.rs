//! Hot path benchmarks for the merge buffer.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Measures push and drain through the in-memory store, raw store command
//! application, and key derivation.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use merge_buffer::{InMemoryStore, KeySpace, MergeBuffer, Reply, StoreCommand};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("bench runtime")
}

/// MergeBuffer::push - one MULTI/EXEC of four commands
fn bench_push(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("push");
    group.throughput(Throughput::Elements(1));

    for payload_len in [16, 256, 4096] {
        let payload = json!({"id": 1, "body": "x".repeat(payload_len)});
        group.bench_function(format!("payload_{}", payload_len), |b| {
            let buffer = MergeBuffer::with_keyspace(InMemoryStore::new(), KeySpace::default());
            let mut n: i64 = 0;
            b.iter(|| {
                n += 1;
                rt.block_on(buffer.push(black_box("bench"), black_box(&payload), n))
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// MergeBuffer::drain - LRANGE + DEL + SREM and decode
fn bench_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("drain");

    for batch in [1u64, 100, 1000] {
        group.throughput(Throughput::Elements(batch));
        group.bench_function(format!("batch_{}", batch), |b| {
            b.iter_batched(
                || {
                    let buffer =
                        MergeBuffer::with_keyspace(InMemoryStore::new(), KeySpace::default());
                    rt.block_on(async {
                        for i in 0..batch {
                            buffer.push("bench", &json!({"id": i}), 0).await.unwrap();
                        }
                    });
                    buffer
                },
                |buffer| {
                    let drained: Vec<Value> = rt.block_on(buffer.drain("bench")).unwrap();
                    black_box(drained)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// InMemoryStore::apply without the async layer
fn bench_store_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_apply");
    group.throughput(Throughput::Elements(1));

    let store = InMemoryStore::new();
    for i in 0..100 {
        store.apply(&StoreCommand::SAdd {
            key: "set".to_string(),
            member: format!("member:{}", i),
        });
    }

    group.bench_function("sismember_hit", |b| {
        let cmd = StoreCommand::SIsMember {
            key: "set".to_string(),
            member: "member:42".to_string(),
        };
        b.iter(|| assert_eq!(store.apply(black_box(&cmd)), Reply::Integer(1)))
    });

    group.bench_function("lpush", |b| {
        let cmd = StoreCommand::LPush {
            key: "list".to_string(),
            value: "{\"id\":1}".to_string(),
        };
        b.iter(|| store.apply(black_box(&cmd)))
    });

    group.finish();
}

/// KeySpace key derivation
fn bench_keys(c: &mut Criterion) {
    let keys = KeySpace::default();
    c.bench_function("msg_key", |b| b.iter(|| keys.msg_key(black_box("digest:1234567"))));
}

criterion_group!(benches, bench_push, bench_drain, bench_store_apply, bench_keys);

criterion_main!(benches);
