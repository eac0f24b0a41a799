use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spanpin::prelude::*;

fn slice_and_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("span");
    group.throughput(Throughput::Elements(100));
    group.bench_function("slice_release_100", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| {
            let store: SharedStore = Rc::new(RefCell::new(CellStore::new()));
            let mut base = Span::new(1000, &store).unwrap();
            let mut slices = Vec::with_capacity(100);
            for _ in 0..100 {
                let a = rng.gen_range(0..=1000);
                let b = rng.gen_range(0..=1000);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                slices.push(base.slice(Interval::new(lo, hi - lo)).unwrap());
            }
            base.release().unwrap();
            for mut span in slices {
                span.release().unwrap();
            }
            let memory_in_use = store.borrow().memory_in_use();
            black_box(memory_in_use)
        })
    });
    group.finish();
}

fn depth_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("covertree");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("depth_at_1000", |b| {
        let store: SharedStore = Rc::new(RefCell::new(CellStore::new()));
        let base = Span::new(4096, &store).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let slices: Vec<Span> = (0..256)
            .map(|_| {
                let a = rng.gen_range(0..=4096);
                let b = rng.gen_range(0..=4096);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                base.slice(Interval::new(lo, hi - lo)).unwrap()
            })
            .collect();
        b.iter(|| {
            let mut acc = 0;
            for p in (0..4096).step_by(4) {
                acc += base.coverage_depth_at(p);
            }
            black_box(acc)
        });
        drop(slices);
    });
    group.finish();
}

criterion_group!(benches, slice_and_release, depth_queries);
criterion_main!(benches);
