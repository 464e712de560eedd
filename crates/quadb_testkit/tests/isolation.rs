//! Snapshot isolation and generation tracking.

use quadb_core::{Generation, TxnType};
use quadb_testkit::{stress_readers_and_writers, StressConfig, TestStore};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn reader_keeps_pre_commit_value() {
    let store = TestStore::memory(3);
    let mut reader = store.begin(TxnType::Read).unwrap();

    let mut writer = store.begin(TxnType::Write).unwrap();
    store.cell.set(&writer, 4).unwrap();
    assert_eq!(store.cell.get(&reader), 3);
    writer.commit().unwrap();
    writer.end().unwrap();

    // Still the old value after the writer committed and ended.
    assert_eq!(store.cell.get(&reader), 3);
    assert_eq!(reader.generation(), Generation::new(0));
    assert_eq!(store.read(), 4);
    reader.end().unwrap();
}

#[test]
fn reader_on_another_thread_keeps_snapshot() {
    let store = TestStore::memory(0);
    let cell = store.cell.clone();
    let coordinator = store.coordinator.clone();

    let (opened_tx, opened) = mpsc::channel();
    let (check_tx, check) = mpsc::channel::<()>();
    let reader = thread::spawn(move || {
        let mut txn = coordinator.begin(TxnType::Read).unwrap();
        opened_tx.send(cell.get(&txn)).unwrap();
        check.recv().unwrap();
        let later = cell.get(&txn);
        txn.end().unwrap();
        later
    });

    let before = opened.recv_timeout(Duration::from_secs(10)).unwrap();
    for value in 1..=5 {
        store.write(value);
    }
    check_tx.send(()).unwrap();
    assert_eq!(reader.join().unwrap(), before);
    assert_eq!(store.read(), 5);
}

#[test]
fn generations_pinned_and_released() {
    let store = TestStore::memory(0);
    let mut old_reader = store.begin(TxnType::Read).unwrap();
    assert_eq!(store.generation_refcount(Generation::new(0)), 1);

    store.write(1);
    store.write(2);
    assert_eq!(store.current_generation(), Generation::new(2));
    // Generation 1 went once the writer pinned to it ended.
    assert_eq!(store.cell.released_generations(), vec![Generation::new(1)]);
    assert_eq!(store.oldest_active_generation(), Some(Generation::new(0)));

    let mut new_reader = store.begin(TxnType::Read).unwrap();
    assert_eq!(new_reader.generation(), Generation::new(2));
    assert_eq!(store.cell.get(&old_reader), 0);
    assert_eq!(store.cell.get(&new_reader), 2);

    old_reader.end().unwrap();
    assert_eq!(
        store.cell.released_generations(),
        vec![Generation::new(1), Generation::new(0)]
    );
    assert_eq!(store.oldest_active_generation(), Some(Generation::new(2)));

    // The current generation is never released.
    new_reader.end().unwrap();
    assert_eq!(store.cell.released_generations().len(), 2);
    assert_eq!(store.oldest_active_generation(), None);
}

#[test]
fn aborted_write_leaves_generation() {
    let store = TestStore::memory(5);
    let mut writer = store.begin(TxnType::Write).unwrap();
    store.cell.set(&writer, 6).unwrap();
    writer.abort().unwrap();
    writer.end().unwrap();

    assert_eq!(store.current_generation(), Generation::new(0));
    assert_eq!(store.read(), 5);
    assert!(!store.cell.has_pending());
}

#[test]
fn concurrent_readers_and_writers() {
    let store = TestStore::memory(0);
    let config = StressConfig {
        readers: 4,
        writers: 2,
        txns_per_thread: 100,
        reads_per_txn: 4,
    };
    let result = stress_readers_and_writers(&store.coordinator, &store.cell, &config);

    assert!(result.is_clean(), "{result:?}");
    assert_eq!(store.cell.committed(), 200);
    assert_eq!(store.current_generation(), Generation::new(200));
    assert_eq!(store.count_active(), 0);
    assert_eq!(store.count_begin(), store.count_finished());
}
