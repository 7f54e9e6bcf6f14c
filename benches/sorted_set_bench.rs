//! PersistentSortedSet construction and bulk-operation benchmark.
//!
//! Compares `from_items` vs `fold + insert` (baseline) and the tree-aware
//! `union` vs inserting the other set's elements one by one.
//!
//! Pre-generated Vec is reused via clone() in setup to avoid regeneration
//! overhead and ensure consistent benchmark data across iterations.

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use ordset::persistent::PersistentSortedSet;
use std::hint::black_box;

const SIZES: [i32; 4] = [100, 1000, 10000, 100000];

fn generate_shuffled_vec(size: i32) -> Vec<i32> {
    // Deterministic pseudo-shuffle, avoids a rand dev-dependency.
    let mut elements: Vec<i32> = (0..size).collect();
    let len = elements.len();
    for index in 0..len {
        let target = (index.wrapping_mul(2_654_435_761)) % len;
        elements.swap(index, target);
    }
    elements
}

/// Returns the appropriate BatchSize based on input size.
fn batch_size_for(size: i32) -> BatchSize {
    if size < 1000 {
        BatchSize::SmallInput
    } else {
        BatchSize::LargeInput
    }
}

fn benchmark_from_items(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("sorted_set_from_items");

    for size in SIZES {
        let base_vec = generate_shuffled_vec(size);
        group.bench_with_input(
            BenchmarkId::new("from_items", size),
            &size,
            |bencher, &size| {
                bencher.iter_batched(
                    || base_vec.clone(),
                    |elements| black_box(PersistentSortedSet::from_items(black_box(elements))),
                    batch_size_for(size),
                );
            },
        );
    }

    group.finish();
}

fn benchmark_fold_insert(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("sorted_set_fold_insert");

    for size in SIZES {
        let base_vec = generate_shuffled_vec(size);
        group.bench_with_input(
            BenchmarkId::new("fold_insert", size),
            &size,
            |bencher, &size| {
                bencher.iter_batched(
                    || base_vec.clone(),
                    |elements| {
                        black_box(elements.into_iter().fold(
                            PersistentSortedSet::new(),
                            |accumulator, element| accumulator.insert(black_box(element)),
                        ))
                    },
                    batch_size_for(size),
                );
            },
        );
    }

    group.finish();
}

fn benchmark_union(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("sorted_set_union");

    for size in [1000, 10000] {
        // Half-overlapping operands
        let first = PersistentSortedSet::from_items(0..size);
        let second = PersistentSortedSet::from_items(size / 2..size + size / 2);

        group.bench_with_input(BenchmarkId::new("union", size), &size, |bencher, _| {
            bencher.iter(|| black_box(black_box(&first).union(black_box(&second))));
        });

        group.bench_with_input(
            BenchmarkId::new("fold_insert", size),
            &size,
            |bencher, _| {
                bencher.iter(|| {
                    black_box(
                        second
                            .iter()
                            .fold(first.clone(), |accumulator, element| {
                                accumulator.insert(black_box(*element))
                            }),
                    )
                });
            },
        );
    }

    group.finish();
}

fn benchmark_slice(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("sorted_set_slice");

    for size in [1000, 10000] {
        let set = PersistentSortedSet::from_items(0..size);
        let quarter = usize::try_from(size / 4).unwrap_or(0);

        group.bench_with_input(
            BenchmarkId::new("slice_middle_half", size),
            &size,
            |bencher, _| {
                bencher.iter(|| {
                    black_box(black_box(&set).slice(
                        isize::try_from(quarter).unwrap_or(0),
                        quarter * 2,
                    ))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_from_items,
    benchmark_fold_insert,
    benchmark_union,
    benchmark_slice
);

criterion_main!(benches);
