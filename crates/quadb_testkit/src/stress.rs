//! Concurrency stress helpers.
//!
//! Readers and writers hammer one [`CellComponent`]. Writers increment the
//! cell; readers check that the value they see never changes during their
//! transaction. A run is clean when every increment landed and no reader saw
//! its snapshot move.

use crate::components::CellComponent;
use quadb_core::{TransactionCoordinator, TxnResult, TxnType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions run.
    pub total_ops: usize,
    /// Transactions that committed or ended cleanly.
    pub successful_ops: usize,
    /// Transactions that returned an error.
    pub failed_ops: usize,
    /// Readers that saw their snapshot change.
    pub snapshot_violations: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    fn new(successful: usize, failed: usize, violations: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            snapshot_violations: violations,
            duration,
            ops_per_second,
        }
    }

    /// Returns true if nothing failed and every snapshot held.
    pub fn is_clean(&self) -> bool {
        self.failed_ops == 0 && self.snapshot_violations == 0
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Snapshot violations: {}", self.snapshot_violations);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Reader threads.
    pub readers: usize,
    /// Writer threads.
    pub writers: usize,
    /// Transactions per thread.
    pub txns_per_thread: usize,
    /// Times each reader re-reads the cell inside one transaction.
    pub reads_per_txn: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            readers: 4,
            writers: 2,
            txns_per_thread: 200,
            reads_per_txn: 4,
        }
    }
}

fn write_once(coordinator: &TransactionCoordinator, cell: &CellComponent) -> TxnResult<()> {
    let mut txn = coordinator.begin(TxnType::Write)?;
    cell.increment(&txn)?;
    txn.commit()?;
    txn.end()
}

/// Runs one read transaction; returns whether its snapshot held.
fn read_once(
    coordinator: &TransactionCoordinator,
    cell: &CellComponent,
    reads: usize,
) -> TxnResult<bool> {
    let mut txn = coordinator.begin(TxnType::Read)?;
    let first = cell.get(&txn);
    let mut stable = true;
    for _ in 0..reads {
        thread::yield_now();
        stable &= cell.get(&txn) == first;
    }
    txn.end()?;
    Ok(stable)
}

/// Runs readers and writers concurrently against `cell`.
pub fn stress_readers_and_writers(
    coordinator: &TransactionCoordinator,
    cell: &Arc<CellComponent>,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let mut handles = Vec::with_capacity(config.readers + config.writers);
    for _ in 0..config.writers {
        let coordinator = coordinator.clone();
        let cell = Arc::clone(cell);
        let successful = Arc::clone(&successful);
        let failed = Arc::clone(&failed);
        let txns = config.txns_per_thread;
        handles.push(thread::spawn(move || {
            for _ in 0..txns {
                match write_once(&coordinator, &cell) {
                    Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                    Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for _ in 0..config.readers {
        let coordinator = coordinator.clone();
        let cell = Arc::clone(cell);
        let successful = Arc::clone(&successful);
        let failed = Arc::clone(&failed);
        let violations = Arc::clone(&violations);
        let txns = config.txns_per_thread;
        let reads = config.reads_per_txn;
        handles.push(thread::spawn(move || {
            for _ in 0..txns {
                match read_once(&coordinator, &cell, reads) {
                    Ok(stable) => {
                        successful.fetch_add(1, Ordering::Relaxed);
                        if !stable {
                            violations.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(_) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        violations.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Runs non-blocking write begins from every thread and counts how many were
/// admitted while another writer held the slot.
///
/// Returns `(admitted, refused, max_concurrent_writers)`.
pub fn stress_try_begin_writers(
    coordinator: &TransactionCoordinator,
    threads: usize,
    attempts: usize,
) -> (usize, usize, usize) {
    let admitted = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let coordinator = coordinator.clone();
            let admitted = Arc::clone(&admitted);
            let refused = Arc::clone(&refused);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            thread::spawn(move || {
                for _ in 0..attempts {
                    match coordinator.try_begin(TxnType::Write) {
                        Ok(Some(mut txn)) => {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            let _ = txn.commit();
                            let _ = txn.end();
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None) => {
                            refused.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {}
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    (
        admitted.load(Ordering::Relaxed),
        refused.load(Ordering::Relaxed),
        max_inside.load(Ordering::SeqCst),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn small_mixed_run_is_clean() {
        let store = TestStore::memory(0);
        let config = StressConfig {
            readers: 2,
            writers: 2,
            txns_per_thread: 25,
            reads_per_txn: 2,
        };
        let result = stress_readers_and_writers(&store.coordinator, &store.cell, &config);
        assert!(result.is_clean());
        assert_eq!(store.cell.committed(), 50);
        assert_eq!(store.count_active(), 0);
    }
}
