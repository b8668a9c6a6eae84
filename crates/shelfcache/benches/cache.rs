use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shelfcache::{Cache, CacheOptions, TieredCache};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_l1", |b| {
        let rt = runtime();
        let cache = Cache::in_memory(1000, 10_000);
        let data = vec![b'x'; 1024];

        // Pre-populate both tiers
        rt.block_on(async {
            for i in 0..100 {
                cache.set(&format!("key:{}", i), &data, &CacheOptions::NONE).await;
            }
        });

        let mut counter = 0;
        b.iter(|| {
            let key = format!("key:{}", counter % 100);
            black_box(rt.block_on(cache.get::<Vec<u8>>(&key, &CacheOptions::NONE)));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_mixed_50_50(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("50_read_50_write_tiered", |b| {
        let rt = runtime();
        let ttl = Duration::from_secs(300);
        let cache = TieredCache::in_memory(1000, ttl, 10_000, ttl);
        let data = vec![b'x'; 1024];

        rt.block_on(async {
            for i in 0..100 {
                cache.set(&format!("key:{}", i), data.clone(), None).await.unwrap();
            }
        });

        let mut counter = 0u64;
        b.iter(|| {
            let key = format!("key:{}", counter % 100);
            if counter.is_multiple_of(2) {
                black_box(rt.block_on(cache.get(&key)).ok());
            } else {
                black_box(rt.block_on(cache.set(&key, data.clone(), None)).ok());
            }
            counter += 1;
        });
    });

    group.finish();
}

fn bench_l1_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_miss");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_promoted_from_l2", |b| {
        let rt = runtime();
        let ttl = Duration::from_secs(300);
        // Small L1
        let cache = TieredCache::in_memory(10, ttl, 10_000, ttl);
        let data = vec![b'x'; 1024];

        // Pre-populate with more than L1 holds
        rt.block_on(async {
            for i in 0..100 {
                cache.set(&format!("key:{}", i), data.clone(), None).await.unwrap();
            }
        });

        let mut counter = 0;
        b.iter(|| {
            // Access pattern that mostly misses L1
            let key = format!("key:{}", counter % 100);
            black_box(rt.block_on(cache.get(&key)).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_cached_get, bench_mixed_50_50, bench_l1_miss);
criterion_main!(benches);
