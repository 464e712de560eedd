//! Commit journal benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quadb_bench::random_data;
use quadb_core::{ComponentId, Generation, Journal, JournalReplay, TxnId};
use quadb_storage::{FileBackend, InMemoryBackend};
use tempfile::TempDir;
use uuid::Uuid;

fn write_group(journal: &Journal, n: u64, payload: &[u8], sync: bool) {
    let txn = TxnId::new(n);
    let generation = Generation::new(n);
    journal.start_group(txn, generation).unwrap();
    journal
        .write_redo(ComponentId::new(Uuid::nil(), 1), payload)
        .unwrap();
    journal.commit_group(txn, generation, sync).unwrap();
}

/// Benchmark appending one commit group to an in-memory journal.
fn bench_memory_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_group_memory");

    for size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let journal = Journal::new(Box::new(InMemoryBackend::new()));
            let payload = random_data(size);
            let mut n = 0;

            b.iter(|| {
                n += 1;
                write_group(&journal, n, black_box(&payload), false);
                journal.reset().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark appending one commit group to a file, with and without sync.
fn bench_file_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_group_file");
    group.sample_size(20);

    for sync in [false, true] {
        group.bench_with_input(BenchmarkId::new("sync", sync), &sync, |b, &sync| {
            let dir = TempDir::new().unwrap();
            let backend = FileBackend::open(&dir.path().join("journal.jrnl")).unwrap();
            let journal = Journal::new(Box::new(backend));
            let payload = random_data(256);
            let mut n = 0;

            b.iter(|| {
                n += 1;
                write_group(&journal, n, &payload, sync);
            });
        });
    }
    group.finish();
}

/// Benchmark replaying a journal of committed groups.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal_replay");

    for groups in [100u64, 1000] {
        group.throughput(Throughput::Elements(groups));
        group.bench_with_input(BenchmarkId::from_parameter(groups), &groups, |b, &groups| {
            let journal = Journal::new(Box::new(InMemoryBackend::new()));
            let payload = random_data(128);
            for n in 1..=groups {
                write_group(&journal, n, &payload, false);
            }

            b.iter(|| {
                let (replay, committed) = JournalReplay::collect(journal.iter().unwrap()).unwrap();
                black_box(replay.highest_generation());
                black_box(committed.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_memory_group, bench_file_group, bench_replay);
criterion_main!(benches);
