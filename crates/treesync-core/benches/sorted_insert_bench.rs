//! Benchmark: natural-order sorted insertion and path index lookups.
//!
//! Run with: `cargo bench -p treesync-core --bench sorted_insert_bench`
//!
//! Models the startup flood of an alarm-configuration style tree: thousands
//! of numbered siblings inserted one at a time, and index lookups racing
//! against concurrent inserts.

use std::hint::black_box;
use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use treesync_core::{PathIndex, compare_natural, insertion_point};

fn names(count: usize) -> Vec<String> {
    // Reverse-ish arrival order so every insert lands near the front.
    (0..count).rev().map(|i| format!("PV:{i}:Status")).collect()
}

fn bench_sorted_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_insert");
    for count in [100usize, 1_000, 5_000] {
        let input = names(count);
        group.bench_function(format!("insert_{count}"), |b| {
            b.iter(|| {
                let mut children: Vec<String> = Vec::with_capacity(count);
                for name in &input {
                    let at = insertion_point(&children, name, String::as_str);
                    children.insert(at, name.clone());
                }
                black_box(children)
            });
        });
    }
    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    c.bench_function("compare_natural", |b| {
        b.iter(|| compare_natural(black_box("Vacuum:Gauge:017"), black_box("Vacuum:Gauge:117")));
    });
}

fn bench_index_contended_reads(c: &mut Criterion) {
    let index = Arc::new(PathIndex::new());
    for i in 0..10_000u64 {
        index.put(&format!("/root/area{}/pv{i}", i % 10), i).ok();
    }
    c.bench_function("index_get_with_writer", |b| {
        let barrier = Arc::new(Barrier::new(2));
        let writer = {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..10_000u64 {
                    let path = format!("/churn/{i}");
                    index.put(&path, i).ok();
                    index.remove(&path).ok();
                }
            })
        };
        barrier.wait();
        b.iter(|| black_box(index.get("/root/area3/pv5003")));
        writer.join().ok();
    });
}

criterion_group!(benches, bench_sorted_insert, bench_compare, bench_index_contended_reads);
criterion_main!(benches);
