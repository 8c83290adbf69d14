//! MCGC Benchmarks
//!
//! Allocation throughput, full and minor cycle latency, incremental
//! marking and barriered stores.
//! Run with: `cargo bench --package mcgc`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mcgc::object::{trace_nothing, visit_slots, GcInfo, GcInfoIndex, Visitor};
use mcgc::{Address, GarbageCollector, GcConfig, GcGeneration};

const LEFT: usize = 0;
const RIGHT: usize = 8;
const NODE_PAYLOAD: usize = 24;

fn trace_node(payload: Address, visitor: &mut dyn Visitor) {
    visit_slots(payload, &[LEFT, RIGHT], visitor);
}

struct Bench {
    gc: GarbageCollector,
    node: GcInfoIndex,
    leaf: GcInfoIndex,
}

impl Bench {
    fn new() -> Self {
        Self::with_config(GcConfig {
            concurrent_marking: false,
            ..Default::default()
        })
    }

    fn with_config(config: GcConfig) -> Self {
        let gc = GarbageCollector::new(config).unwrap();
        let node = gc.register_gc_info(GcInfo::new("Node", trace_node)).unwrap();
        let leaf = gc.register_gc_info(GcInfo::new("Leaf", trace_nothing)).unwrap();
        Self { gc, node, leaf }
    }

    fn node(&self) -> Address {
        let node = self.gc.allocate(NODE_PAYLOAD, self.node).unwrap();
        self.gc.finish_construction(node).unwrap();
        node
    }

    /// Complete binary tree of `depth` levels
    fn tree(&self, depth: u32) -> Address {
        let root = self.node();
        if depth > 1 {
            self.gc.store(root, LEFT, self.tree(depth - 1)).unwrap();
            self.gc.store(root, RIGHT, self.tree(depth - 1)).unwrap();
        }
        root
    }
}

fn bench_gc_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_creation");

    group.bench_function("default_config", |b| {
        b.iter(|| black_box(GarbageCollector::new(GcConfig::default()).unwrap()))
    });

    group.bench_function("with_custom_spaces", |b| {
        b.iter(|| {
            let config = GcConfig {
                custom_spaces: vec![Default::default(); 4],
                ..Default::default()
            };
            black_box(GarbageCollector::new(config).unwrap())
        })
    });

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    // Size classes, regular space, large space
    let sizes = [16, 48, 112, 240, 1024, 8192, 65536];
    for &size in &sizes {
        let bench = Bench::new();
        group.throughput(Throughput::Bytes(size as u64));
        // Exhausting the heap collects; every object is garbage
        group.bench_function(format!("size_{}", size), |b| {
            b.iter(|| black_box(bench.gc.allocate(size, bench.leaf).unwrap()))
        });
    }

    group.finish();
}

fn bench_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_cycle");

    for &depth in &[10u32, 14] {
        let bench = Bench::new();
        let _root = bench.gc.persistent(bench.tree(depth));
        group.throughput(Throughput::Elements((1u64 << depth) - 1));
        group.bench_function(format!("live_tree_depth_{}", depth), |b| {
            b.iter(|| black_box(bench.gc.collect(GcGeneration::Full).unwrap()))
        });
    }

    let bench = Bench::new();
    group.bench_function("all_garbage_1000", |b| {
        b.iter_batched(
            || {
                for _ in 0..1_000 {
                    bench.node();
                }
            },
            |_| black_box(bench.gc.collect(GcGeneration::Full).unwrap()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_minor_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("minor_cycle");

    let bench = Bench::new();
    let _old = bench.gc.persistent(bench.tree(12));
    bench.gc.collect(GcGeneration::Full).unwrap();

    group.bench_function("young_garbage_over_old_tree", |b| {
        b.iter_batched(
            || {
                for _ in 0..1_000 {
                    bench.node();
                }
            },
            |_| black_box(bench.gc.collect(GcGeneration::Young).unwrap()),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_incremental_marking(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_marking");

    let bench = Bench::new();
    let _root = bench.gc.persistent(bench.tree(12));

    for &budget in &[64usize, 1024] {
        group.bench_function(format!("budget_{}", budget), |b| {
            b.iter(|| {
                bench.gc.start_incremental_marking().unwrap();
                while !bench.gc.incremental_step(Some(budget)).unwrap() {}
                black_box(bench.gc.finalize_incremental_marking().unwrap())
            })
        });
    }

    group.finish();
}

fn bench_write_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_barrier");

    let bench = Bench::new();
    let host = bench.node();
    let value = bench.node();
    let _roots = (bench.gc.persistent(host), bench.gc.persistent(value));

    group.bench_function("idle_young_store", |b| {
        b.iter(|| black_box(bench.gc.store(host, LEFT, value).unwrap()))
    });

    bench.gc.collect(GcGeneration::Full).unwrap();
    group.bench_function("idle_old_to_old_store", |b| {
        b.iter(|| black_box(bench.gc.store(host, LEFT, value).unwrap()))
    });

    bench.gc.start_incremental_marking().unwrap();
    group.bench_function("marking_store", |b| {
        b.iter(|| black_box(bench.gc.store(host, RIGHT, value).unwrap()))
    });
    bench.gc.finalize_incremental_marking().unwrap();

    group.finish();
}

criterion_group!(
    benches,
    bench_gc_creation,
    bench_allocation,
    bench_full_cycle,
    bench_minor_cycle,
    bench_incremental_marking,
    bench_write_barrier
);
criterion_main!(benches);
