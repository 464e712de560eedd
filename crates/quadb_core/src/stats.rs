//! Coordinator statistics.
//!
//! # Usage
//!
//! ```rust
//! use quadb_core::{TransactionCoordinator, TxnType};
//!
//! let coordinator = TransactionCoordinator::in_memory();
//! coordinator.start().unwrap();
//!
//! let mut txn = coordinator.begin(TxnType::Read).unwrap();
//! txn.end().unwrap();
//!
//! let stats = coordinator.stats();
//! assert_eq!(stats.begins, 1);
//! assert_eq!(stats.finished, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinator counters.
///
/// All counters are atomic and can be read while transactions run. They
/// only ever grow.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    begins: AtomicU64,
    begins_read: AtomicU64,
    begins_write: AtomicU64,
    finished: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    promotions: AtomicU64,
    promotion_failures: AtomicU64,
    admission_refusals: AtomicU64,
    recovered_groups: AtomicU64,
    fatal_commits: AtomicU64,
}

impl CoordinatorStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an admitted transaction; write-capable types count as writes.
    pub(crate) fn record_begin(&self, write_capable: bool) {
        self.begins.fetch_add(1, Ordering::Relaxed);
        if write_capable {
            self.begins_write.fetch_add(1, Ordering::Relaxed);
        } else {
            self.begins_read.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_finish(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promotion(&self, promoted: bool) {
        if promoted {
            self.promotions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.promotion_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_refusal(&self) {
        self.admission_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovered(&self, groups: u64) {
        self.recovered_groups.fetch_add(groups, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal(&self) {
        self.fatal_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Transactions admitted.
    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::Relaxed)
    }

    /// READ transactions admitted.
    pub fn begins_read(&self) -> u64 {
        self.begins_read.load(Ordering::Relaxed)
    }

    /// Write-capable transactions admitted.
    pub fn begins_write(&self) -> u64 {
        self.begins_write.load(Ordering::Relaxed)
    }

    /// Transactions ended.
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            begins: self.begins(),
            begins_read: self.begins_read(),
            begins_write: self.begins_write(),
            finished: self.finished(),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
            admission_refusals: self.admission_refusals.load(Ordering::Relaxed),
            recovered_groups: self.recovered_groups.load(Ordering::Relaxed),
            fatal_commits: self.fatal_commits.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of coordinator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStatsSnapshot {
    /// Transactions admitted.
    pub begins: u64,
    /// READ transactions admitted.
    pub begins_read: u64,
    /// Write-capable transactions admitted (WRITE and both promote types).
    pub begins_write: u64,
    /// Transactions ended.
    pub finished: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions aborted, explicitly or by a failed commit.
    pub aborted: u64,
    /// Successful promotions.
    pub promotions: u64,
    /// Refused promotions.
    pub promotion_failures: u64,
    /// Non-blocking begins that were not admitted.
    pub admission_refusals: u64,
    /// Commit groups replayed at start.
    pub recovered_groups: u64,
    /// Commits that failed after the journal recorded them.
    pub fatal_commits: u64,
}
