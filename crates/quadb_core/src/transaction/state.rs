//! Transaction handles.

use crate::error::TxnResult;
use crate::transaction::coordinator::CoordinatorCore;
use crate::types::{Generation, ReadWrite, TxnContext, TxnId, TxnState, TxnType};
use std::sync::Arc;
use std::thread::ThreadId;

/// Book-keeping the coordinator keeps per transaction.
#[derive(Debug, Clone)]
pub(crate) struct TxnRecord {
    pub(crate) id: TxnId,
    pub(crate) txn_type: TxnType,
    pub(crate) mode: ReadWrite,
    pub(crate) state: TxnState,
    pub(crate) generation: Generation,
    pub(crate) holds_writer: bool,
    /// Thread the exclusivity gate booked the admission to.
    pub(crate) admitted_on: ThreadId,
}

impl TxnRecord {
    pub(crate) fn context(&self) -> TxnContext {
        TxnContext {
            id: self.id,
            txn_type: self.txn_type,
            mode: self.mode,
            generation: self.generation,
        }
    }
}

/// An admitted transaction.
///
/// Created by [`TransactionCoordinator::begin`](crate::TransactionCoordinator::begin)
/// and friends, owned by one thread at a time. Pass it explicitly to every
/// storage operation that should run inside it.
///
/// ## Lifecycle
///
/// `ACTIVE -> (PREPARING) -> COMMITTED | ABORTED -> ENDED`
///
/// [`end`](Self::end) releases the generation pin and the admission slot;
/// calling it again is a no-op. Ending an active write without commit or
/// abort rolls it back and reports a lifecycle error. Dropping a transaction
/// that was never ended ends it.
///
/// # Example
///
/// ```rust
/// use quadb_core::{TransactionCoordinator, TxnState, TxnType};
///
/// let coordinator = TransactionCoordinator::in_memory();
/// coordinator.start().unwrap();
///
/// let mut txn = coordinator.begin(TxnType::Write).unwrap();
/// txn.commit().unwrap();
/// assert_eq!(txn.state(), TxnState::Committed);
/// txn.end().unwrap();
/// assert_eq!(coordinator.count_active(), 0);
/// ```
pub struct Transaction {
    core: Arc<CoordinatorCore>,
    record: TxnRecord,
}

impl Transaction {
    pub(crate) fn new(core: Arc<CoordinatorCore>, record: TxnRecord) -> Self {
        Self { core, record }
    }

    pub(crate) fn record_mut(&mut self) -> &mut TxnRecord {
        &mut self.record
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.record.id
    }

    /// Returns the type requested at begin.
    #[must_use]
    pub fn txn_type(&self) -> TxnType {
        self.record.txn_type
    }

    /// Returns the current access mode.
    #[must_use]
    pub fn mode(&self) -> ReadWrite {
        self.record.mode
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.record.state
    }

    /// Returns the generation this transaction reads.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.record.generation
    }

    /// Returns the view handed to components.
    #[must_use]
    pub fn context(&self) -> TxnContext {
        self.record.context()
    }

    /// Returns true if the transaction currently holds write access.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.record.mode == ReadWrite::Write
    }

    /// Tries to upgrade to write access.
    ///
    /// Returns `Ok(false)` if promotion is refused: a `READ_PROMOTE`
    /// transaction refuses once another commit has happened since it began,
    /// and either type refuses when the writer slot cannot be had (without
    /// waiting, if so configured). A transaction that already writes
    /// returns `Ok(true)`.
    ///
    /// # Errors
    ///
    /// [`TxnError::PromotionNotAllowed`](crate::TxnError::PromotionNotAllowed)
    /// for `READ` transactions; a lifecycle error unless `ACTIVE`.
    pub fn promote(&mut self) -> TxnResult<bool> {
        self.core.promote(&mut self.record)
    }

    /// Commits the transaction.
    ///
    /// For a writer this runs the two-phase commit: prepare on every
    /// component, journal the group, commit on every component.
    ///
    /// # Errors
    ///
    /// - [`TxnError::CommitFailed`](crate::TxnError::CommitFailed) or
    ///   [`TxnError::JournalWriteFailed`](crate::TxnError::JournalWriteFailed):
    ///   rolled back, the transaction is `ABORTED`
    /// - [`TxnError::CommitFatal`](crate::TxnError::CommitFatal): the journal
    ///   recorded the commit but a component failed to apply it
    /// - [`TxnError::CommitInDoubt`](crate::TxnError::CommitInDoubt): rolled
    ///   back, but the journal may still hold the commit
    /// - a lifecycle error unless `ACTIVE`
    pub fn commit(&mut self) -> TxnResult<()> {
        self.core.commit(&mut self.record)
    }

    /// Rolls the transaction back.
    pub fn abort(&mut self) -> TxnResult<()> {
        self.core.abort(&mut self.record)
    }

    /// Releases the transaction's resources.
    pub fn end(&mut self) -> TxnResult<()> {
        self.core.end(&mut self.record)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.record.state != TxnState::Ended {
            self.core.end_on_drop(&mut self.record);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.record.id)
            .field("txn_type", &self.record.txn_type)
            .field("mode", &self.record.mode)
            .field("state", &self.record.state)
            .field("generation", &self.record.generation)
            .finish_non_exhaustive()
    }
}
