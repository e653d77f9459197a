//! Benchmarks for the hot paths of the reactive runtime.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use orbital_core::{atom, batch, computed, subscribe};

fn bench_atom_rw(c: &mut Criterion) {
    let value = atom(0_u64);

    c.bench_function("atom_get", |b| {
        b.iter(|| black_box(value.get()));
    });

    c.bench_function("atom_set", |b| {
        let mut i = 0_u64;
        b.iter(|| {
            i += 1;
            value.set(black_box(i))
        });
    });
}

fn bench_notify(c: &mut Criterion) {
    let value = atom(0_u64);
    let value_read = value.clone();
    let _sub = subscribe(move || value_read.get(), |_, _| {});

    c.bench_function("atom_set_with_subscriber", |b| {
        let mut i = 0_u64;
        b.iter(|| {
            i += 1;
            value.set(black_box(i))
        });
    });

    c.bench_function("batched_writes", |b| {
        let mut i = 0_u64;
        b.iter(|| {
            batch(|| {
                for _ in 0..10 {
                    i += 1;
                    value.set(black_box(i));
                }
            })
        });
    });
}

fn bench_computed(c: &mut Criterion) {
    let base = atom(0_u64);
    let base_read = base.clone();
    let derived = computed(move || base_read.get() * 2);

    c.bench_function("computed_propagation", |b| {
        let mut i = 0_u64;
        b.iter(|| {
            i += 1;
            base.set(black_box(i));
            black_box(derived.get())
        });
    });
}

criterion_group!(benches, bench_atom_rw, bench_notify, bench_computed);
criterion_main!(benches);
