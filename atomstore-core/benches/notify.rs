//! Write and read throughput of the store.

use std::hint::black_box;

use atomstore_core::Store;
use criterion::{criterion_group, criterion_main, Criterion};

fn write_fan_out(c: &mut Criterion) {
    let store = Store::new();
    let atom = store.create_atom(0_u64);
    let doubled = store.map(&atom, |v: &u64| v * 2).unwrap();
    let _subs: Vec<_> = (0..16)
        .map(|i| {
            if i % 2 == 0 {
                store.subscribe(&atom, |v| {
                    black_box(v);
                })
            } else {
                store.subscribe(&doubled, |v| {
                    black_box(v);
                })
            }
            .unwrap()
        })
        .collect();

    let mut next = 0_u64;
    c.bench_function("write_16_observers", |b| {
        b.iter(|| {
            next += 1;
            store.write(&atom, black_box(next)).unwrap();
        })
    });
}

fn cached_selector_read(c: &mut Criterion) {
    let store = Store::new();
    let a = store.create_atom(3_u64);
    let b = store.create_atom(4_u64);
    let sum = store.combine(&a, &b, |a: &u64, b: &u64| a + b).unwrap();
    store.read(&sum).unwrap();

    c.bench_function("read_cached_selector", |bench| {
        bench.iter(|| black_box(store.read(&sum).unwrap()))
    });
}

criterion_group!(benches, write_fan_out, cached_selector_read);
criterion_main!(benches);
