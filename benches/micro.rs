//! Micro-benchmarks for the two storage engines.
//!
//! Uses Criterion for statistically rigorous measurement with
//! regression detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- lsm_put   # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use duokv::{BtreeConfig, BtreeEngine, LsmConfig, LsmEngine};
use tempfile::TempDir;

const VALUE: &[u8] = b"benchmark-value-0123456789abcdef";

fn lsm_config() -> LsmConfig {
    LsmConfig {
        mem_flush_bytes: 256 * 1024,
        memtable_max_entries: 4096,
        compact_trigger: 8,
        ..LsmConfig::default()
    }
}

fn bench_lsm_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("lsm_put");
    group.throughput(Throughput::Elements(1));
    group.bench_function("sequential", |b| {
        let dir = TempDir::new().unwrap();
        let engine = LsmEngine::open(dir.path(), lsm_config()).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            engine.put(&format!("key_{i:012}"), black_box(VALUE)).unwrap();
            i += 1;
        });
    });
    group.finish();
}

fn bench_lsm_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = LsmEngine::open(dir.path(), lsm_config()).unwrap();
    for i in 0..10_000u64 {
        engine.put(&format!("key_{i:012}"), VALUE).unwrap();
    }
    engine.flush().unwrap();

    let mut group = c.benchmark_group("lsm_get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("from_sstable", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{:012}", i % 10_000);
            black_box(engine.get(&key).unwrap());
            i += 1;
        });
    });
    group.finish();
}

fn bench_btree_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_put");
    group.throughput(Throughput::Elements(1));
    group.bench_function("sequential", |b| {
        let dir = TempDir::new().unwrap();
        let engine = BtreeEngine::open(
            dir.path(),
            BtreeConfig {
                max_keys_per_page: 64,
                ..BtreeConfig::default()
            },
        )
        .unwrap();
        let mut i = 0u64;
        b.iter(|| {
            engine.put(&format!("key_{i:012}"), black_box(VALUE)).unwrap();
            i += 1;
        });
    });
    group.finish();
}

fn bench_btree_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = BtreeEngine::open(
        dir.path(),
        BtreeConfig {
            max_keys_per_page: 64,
            ..BtreeConfig::default()
        },
    )
    .unwrap();
    for i in 0..10_000u64 {
        engine.put(&format!("key_{i:012}"), VALUE).unwrap();
    }

    let mut group = c.benchmark_group("btree_get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("point_lookup", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key_{:012}", i % 10_000);
            black_box(engine.get(&key).unwrap());
            i += 1;
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_lsm_put,
    bench_lsm_get,
    bench_btree_put,
    bench_btree_get
);
criterion_main!(benches);
