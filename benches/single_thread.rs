use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hoptable::HashTable;

const SIZE: usize = 10_000;

#[derive(Clone, Copy)]
struct RandomKeys {
    state: usize,
}

impl RandomKeys {
    fn new() -> Self {
        RandomKeys { state: 0 }
    }
}

impl Iterator for RandomKeys {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        // Add 1 then multiply by some 32 bit prime.
        self.state = self.state.wrapping_add(1).wrapping_mul(3_787_392_781);
        Some(self.state)
    }
}

fn read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    group.bench_function("hoptable", |b| {
        let table = HashTable::<usize, usize>::with_capacity(SIZE);
        for i in RandomKeys::new().take(SIZE) {
            table.add(i, i);
        }

        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(table.lookup(&i), Some(i)));
            }
        });
    });

    group.bench_function("hoptable-pinned", |b| {
        let table = HashTable::<usize, usize>::with_capacity(SIZE);
        for i in RandomKeys::new().take(SIZE) {
            table.add(i, i);
        }

        b.iter(|| {
            let pinned = table.pin();
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(pinned.get(&i), Some(&i)));
            }
        });
    });

    group.bench_function("std", |b| {
        let mut m = HashMap::<usize, usize>::default();
        for i in RandomKeys::new().take(SIZE) {
            m.insert(i, i);
        }

        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(assert_eq!(m.get(&i), Some(&i)));
            }
        });
    });

    group.finish();
}

fn write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    // Starts from the smallest table, so resizes are included.
    group.bench_function("hoptable", |b| {
        b.iter_batched(
            HashTable::<usize, usize>::new,
            |table| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(table.add(i, i));
                }
                table
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("hoptable-add-count", |b| {
        let table = HashTable::<usize, usize>::with_capacity(1024);
        b.iter(|| {
            for i in RandomKeys::new().take(SIZE) {
                black_box(table.add_count(i % 1024, 1));
            }
        });
    });

    group.bench_function("std", |b| {
        b.iter_batched(
            HashMap::<usize, usize>::new,
            |mut m| {
                for i in RandomKeys::new().take(SIZE) {
                    black_box(m.insert(i, i));
                }
                m
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, read, write);
criterion_main!(benches);
