//! Merge strategy benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tidesync_bench::{empty_env, entries, merge, seeded_env};
use tidesync_merge::Strategy;

const TABLE: &str = "bench";

/// Loading a snapshot into an empty table.
fn bench_initial_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_load");

    for count in [1_000usize, 10_000].iter() {
        let source = entries(*count, 0, 2_000, 64);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("append", count), &source, |b, source| {
            let env = empty_env(TABLE);
            b.iter(|| {
                let mut txn = env.begin_write();
                merge(&mut txn, TABLE, black_box(source), Strategy::Append);
                // Dropped without commit so every iteration starts empty.
            });
        });
        group.bench_with_input(BenchmarkId::new("update", count), &source, |b, source| {
            let env = empty_env(TABLE);
            b.iter(|| {
                let mut txn = env.begin_write();
                merge(&mut txn, TABLE, black_box(source), Strategy::Update);
            });
        });
    }
    group.finish();
}

/// Merging a partly overlapping snapshot into a populated table.
fn bench_remote_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("remote_merge");

    for count in [1_000usize, 10_000].iter() {
        let local = entries(*count, 3, 1_000, 64);
        let remote = entries(*count, 5, 2_000, 64);
        group.throughput(Throughput::Elements(remote.len() as u64));

        for strategy in [Strategy::Put, Strategy::IterPut, Strategy::Update, Strategy::IterUpdate] {
            let id = BenchmarkId::new(format!("{strategy:?}").to_lowercase(), count);
            group.bench_with_input(id, &remote, |b, remote| {
                let env = seeded_env(TABLE, &local);
                b.iter(|| {
                    let mut txn = env.begin_write();
                    merge(&mut txn, TABLE, black_box(remote), strategy);
                });
            });
        }
    }
    group.finish();
}

/// Re-applying a snapshot that is already merged, the steady state of a
/// sync loop.
fn bench_noop_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("noop_merge");

    let source = entries(10_000, 0, 2_000, 64);
    let env = seeded_env(TABLE, &source);
    group.throughput(Throughput::Elements(source.len() as u64));
    group.bench_function("update", |b| {
        b.iter(|| {
            let mut txn = env.begin_write();
            merge(&mut txn, TABLE, black_box(&source), Strategy::Update);
            assert!(!txn.is_dirty());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_initial_load, bench_remote_merge, bench_noop_merge);
criterion_main!(benches);
