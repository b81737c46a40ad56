use criterion::{black_box, criterion_group, criterion_main, Criterion};

use peercache::byteview::ByteView;
use peercache::lru::LRUCache;
use peercache::ring::HashRing;

fn ring_benchmarks(c: &mut Criterion) {
    let peers: Vec<String> = (0..16).map(|i| format!("http://peer-{}:8001", i)).collect();
    let mut ring = HashRing::new(50);
    ring.add(&peers);

    c.bench_function("looking up the owner of a key", |b| {
        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(ring.get(&format!("key-{}", i % 10_000)));
        })
    });

    c.bench_function("building a ring of 16 peers", |b| {
        b.iter(|| {
            let mut ring = HashRing::new(50);
            ring.add(black_box(&peers));
            black_box(ring.len());
        })
    });
}

fn lru_benchmarks(c: &mut Criterion) {
    c.bench_function("filling a bounded lru cache", |b| {
        let mut lru = LRUCache::new(64 * 1024);
        let value = ByteView::from(vec![0u8; 128]);
        let mut i = 0;
        b.iter(|| {
            i += 1;
            lru.put(format!("key-{}", i), value.clone());
        });

        black_box(lru.len());
    });

    c.bench_function("reading from a lru cache", |b| {
        let mut lru = LRUCache::new(0);
        for i in 0..10_000 {
            lru.put(format!("key-{}", i), ByteView::from(format!("value-{}", i).as_str()));
        }

        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(lru.get(&format!("key-{}", i % 20_000)).is_some());
        });
    });
}

criterion_group!(benches, ring_benchmarks, lru_benchmarks);
criterion_main!(benches);
