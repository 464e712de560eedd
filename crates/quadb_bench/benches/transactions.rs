//! Transaction lifecycle benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quadb_bench::{random_data, started_coordinator};
use quadb_core::TxnType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Benchmark begin + end of a READ.
fn bench_read(c: &mut Criterion) {
    let (coordinator, _blobs) = started_coordinator(1);
    c.bench_function("read_begin_end", |b| {
        b.iter(|| {
            let mut txn = coordinator.begin(TxnType::Read).unwrap();
            black_box(txn.generation());
            txn.end().unwrap();
        });
    });
}

/// Benchmark a full WRITE commit for several redo sizes.
fn bench_write_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_commit");

    for size in [0usize, 64, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (coordinator, blobs) = started_coordinator(1);
            let data = random_data(size);

            b.iter(|| {
                let mut txn = coordinator.begin(TxnType::Write).unwrap();
                if size > 0 {
                    blobs[0].stage(txn.id(), data.clone());
                }
                txn.commit().unwrap();
                txn.end().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark commit cost as the number of components grows.
fn bench_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_commit_components");

    for count in [1u32, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (coordinator, blobs) = started_coordinator(count);
            let data = random_data(128);

            b.iter(|| {
                let mut txn = coordinator.begin(TxnType::Write).unwrap();
                for blob in &blobs {
                    blob.stage(txn.id(), data.clone());
                }
                txn.commit().unwrap();
                txn.end().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a READ_COMMITTED_PROMOTE that promotes and commits.
fn bench_promote(c: &mut Criterion) {
    let (coordinator, _blobs) = started_coordinator(1);
    c.bench_function("promote_read_committed", |b| {
        b.iter(|| {
            let mut txn = coordinator.begin(TxnType::ReadCommittedPromote).unwrap();
            assert!(txn.promote().unwrap());
            txn.commit().unwrap();
            txn.end().unwrap();
        });
    });
}

/// Benchmark READ admission while other threads read continuously.
fn bench_contended_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_contended");

    for threads in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let (coordinator, _blobs) = started_coordinator(1);
            let stop = Arc::new(AtomicBool::new(false));
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let coordinator = coordinator.clone();
                    let stop = Arc::clone(&stop);
                    thread::spawn(move || {
                        while !stop.load(Ordering::Relaxed) {
                            let mut txn = coordinator.begin(TxnType::Read).unwrap();
                            txn.end().unwrap();
                        }
                    })
                })
                .collect();

            b.iter(|| {
                let mut txn = coordinator.begin(TxnType::Read).unwrap();
                txn.end().unwrap();
            });

            stop.store(true, Ordering::Relaxed);
            for handle in handles {
                handle.join().unwrap();
            }
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_read,
    bench_write_commit,
    bench_components,
    bench_promote,
    bench_contended_read,
);
criterion_main!(benches);
