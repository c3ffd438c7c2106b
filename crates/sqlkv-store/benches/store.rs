//! Throughput benchmarks for the hot store operations.

use std::time::Duration;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use sqlkv_store::KvStore;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn open(rt: &Runtime) -> (tempfile::TempDir, KvStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = rt
        .block_on(KvStore::open(dir.path().join("bench.db"), "bench"))
        .unwrap();
    (dir, store)
}

fn bench_set(c: &mut Criterion) {
    let rt = runtime();
    let (_dir, store) = open(&rt);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("permanent", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("key:{i}");
            let store = store.clone();
            async move { store.set(&key, "value", Duration::ZERO).await.unwrap() }
        });
    });

    group.bench_function("with_ttl", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i += 1;
            let key = format!("ttl:{i}");
            let store = store.clone();
            async move {
                store
                    .set(&key, "value", Duration::from_secs(3_600))
                    .await
                    .unwrap()
            }
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let rt = runtime();
    let (_dir, store) = open(&rt);
    rt.block_on(async {
        for i in 0..1_000 {
            store
                .set(&format!("key:{i}"), "value", Duration::ZERO)
                .await
                .unwrap();
        }
    });

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hit", |b| {
        let mut i = 0u64;
        b.to_async(&rt).iter(|| {
            i = (i + 1) % 1_000;
            let key = format!("key:{i}");
            let store = store.clone();
            async move { store.get(&key).await.unwrap() }
        });
    });

    group.bench_function("miss", |b| {
        let store = store.clone();
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move { store.get("missing").await.is_err() }
        });
    });

    group.finish();
}

fn bench_keys(c: &mut Criterion) {
    let rt = runtime();
    let (_dir, store) = open(&rt);
    rt.block_on(async {
        for i in 0..1_000 {
            let prefix = if i % 2 == 0 { "user" } else { "product" };
            store
                .set(&format!("{prefix}:{i}"), "value", Duration::ZERO)
                .await
                .unwrap();
        }
    });

    c.bench_function("keys/prefix_500_of_1000", |b| {
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move { store.keys("user:*").await.unwrap().len() }
        });
    });
}

criterion_group!(benches, bench_set, bench_get, bench_keys);
criterion_main!(benches);
