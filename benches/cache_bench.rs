use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tinylfu_cache::CacheBuilder;
use tokio::runtime::Runtime;

fn bench_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    const OPS_PER_ITER: usize = 1024;

    let mut group = c.benchmark_group("cache/get");
    for &size in &[64usize, 1024, 16384] {
        group.throughput(Throughput::Elements(OPS_PER_ITER as u64));
        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, &size| {
            let cache = rt.block_on(async {
                let cache = CacheBuilder::<u64, u64>::new(size * 10, size as i64 * 2)
                    .buffer_items(64)
                    .ignore_internal_cost(true)
                    .build()
                    .unwrap();
                for i in 0..size as u64 {
                    cache.set(&i, i, 1);
                }
                cache.wait().await;
                cache
            });

            let mut pos = 0u64;
            b.iter(|| {
                let mut checksum = 0u64;
                for _ in 0..OPS_PER_ITER {
                    let key = pos % size as u64;
                    pos = pos.wrapping_add(1);
                    checksum ^= cache.get(black_box(&key)).unwrap_or(0);
                }
                black_box(checksum);
            });
        });
    }
    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    const OPS_PER_ITER: usize = 1024;

    let mut group = c.benchmark_group("cache/set");
    group.throughput(Throughput::Elements(OPS_PER_ITER as u64));
    group.bench_function("insert_with_eviction", |b| {
        let cache = rt.block_on(async {
            CacheBuilder::<u64, u64>::new(10_000, 1_000)
                .buffer_items(64)
                .ignore_internal_cost(true)
                .build()
                .unwrap()
        });

        let mut next = 0u64;
        b.iter(|| {
            for _ in 0..OPS_PER_ITER {
                cache.set(black_box(&next), next, 1);
                next = next.wrapping_add(1);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_get, bench_set);
criterion_main!(benches);
