//! Benchmarks for cache reads, document parsing and single-flight overhead

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use flagsync::{
    CacheStore, CachedEntry, ConfigDocument, ConfigKey, Deduplicator, MemoryBackend, Validators,
    DEFAULT_FLAGS_KEY,
};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn document_body(flags: usize) -> Vec<u8> {
    let flags: serde_json::Map<String, serde_json::Value> = (0..flags)
        .map(|i| {
            (
                format!("flag-{i}"),
                serde_json::json!({ "value": i % 2 == 0, "rules": [{ "attr": "country", "in": ["NZ", "AU"] }] }),
            )
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({ "flags": flags })).unwrap()
}

fn bench_store_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = CacheStore::new(MemoryBackend::with_defaults());
    let key = ConfigKey::anonymous("bench", "default");

    rt.block_on(async {
        let document = ConfigDocument::parse(&document_body(100), DEFAULT_FLAGS_KEY)
            .unwrap()
            .document;
        let entry = CachedEntry::new(document, Validators::default(), Duration::from_secs(3600));
        store.put(&key, entry, Duration::from_secs(3600)).await;
    });

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_loaded", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(store.get(black_box(&key)).await);
            });
        });
    });

    group.bench_function("lookup_loaded", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(store.lookup(black_box(&key)).await);
            });
        });
    });

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for flags in [10, 100, 1000] {
        let body = document_body(flags);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_function(format!("{flags}_flags"), |b| {
            b.iter(|| ConfigDocument::parse(black_box(&body), DEFAULT_FLAGS_KEY).unwrap());
        });
    }

    group.finish();
}

fn bench_single_flight(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dedup: Deduplicator<u64> = Deduplicator::new();

    let mut group = c.benchmark_group("single_flight");

    group.throughput(Throughput::Elements(1));
    group.bench_function("uncontended", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(dedup.execute("key", || async { Ok(42) }).await.unwrap());
            });
        });
    });

    group.throughput(Throughput::Elements(32));
    group.bench_function("32_waiters", |b| {
        b.iter(|| {
            rt.block_on(async {
                let calls = (0..32).map(|_| {
                    dedup.execute("key", || async {
                        tokio::task::yield_now().await;
                        Ok(42)
                    })
                });
                black_box(futures::future::join_all(calls).await);
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_store_get, bench_parse, bench_single_flight);
criterion_main!(benches);
