//! Scoped transaction helpers.

use crate::error::TxnError;
use crate::transaction::coordinator::TransactionCoordinator;
use crate::transaction::state::Transaction;
use crate::types::{TxnState, TxnType};
use tracing::warn;

/// Runs closures inside transactions and always ends them.
///
/// Write helpers commit when the action returns `Ok` and abort when it
/// returns `Err`. Either way the transaction is ended exactly once. If the
/// action panics, dropping the transaction aborts and ends it.
///
/// # Example
///
/// ```rust
/// use quadb_core::{TransactionCoordinator, TransactionalBase, TxnError};
///
/// let coordinator = TransactionCoordinator::in_memory();
/// coordinator.start()?;
/// let base = TransactionalBase::new(coordinator.clone());
///
/// let generation = base.calculate_write(|txn| Ok::<_, TxnError>(txn.generation()))?;
/// assert_eq!(generation.as_u64(), 0);
/// assert_eq!(coordinator.current_generation().as_u64(), 1);
/// # Ok::<(), TxnError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TransactionalBase {
    coordinator: TransactionCoordinator,
}

impl TransactionalBase {
    /// Wraps a coordinator.
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    /// Returns the wrapped coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// Begins a transaction, blocking until admitted.
    pub fn begin(&self, txn_type: TxnType) -> Result<Transaction, TxnError> {
        self.coordinator.begin(txn_type)
    }

    /// Runs `action` in a READ transaction.
    pub fn execute_read<E, F>(&self, action: F) -> Result<(), E>
    where
        E: From<TxnError>,
        F: FnOnce(&mut Transaction) -> Result<(), E>,
    {
        self.calculate_read(action)
    }

    /// Runs `action` in a WRITE transaction, committing on success.
    pub fn execute_write<E, F>(&self, action: F) -> Result<(), E>
    where
        E: From<TxnError>,
        F: FnOnce(&mut Transaction) -> Result<(), E>,
    {
        self.calculate_write(action)
    }

    /// Runs `action` in a READ transaction and returns its value.
    pub fn calculate_read<T, E, F>(&self, action: F) -> Result<T, E>
    where
        E: From<TxnError>,
        F: FnOnce(&mut Transaction) -> Result<T, E>,
    {
        let mut txn = self.begin(TxnType::Read)?;
        match action(&mut txn) {
            Ok(value) => {
                txn.end()?;
                Ok(value)
            }
            Err(e) => {
                end_quietly(&mut txn);
                Err(e)
            }
        }
    }

    /// Runs `action` in a WRITE transaction and returns its value once
    /// committed.
    ///
    /// A failed commit leaves the transaction aborted; the commit error is
    /// returned after the transaction is ended.
    pub fn calculate_write<T, E, F>(&self, action: F) -> Result<T, E>
    where
        E: From<TxnError>,
        F: FnOnce(&mut Transaction) -> Result<T, E>,
    {
        let mut txn = self.begin(TxnType::Write)?;
        match action(&mut txn) {
            Ok(value) => {
                if let Err(e) = txn.commit() {
                    end_quietly(&mut txn);
                    return Err(e.into());
                }
                txn.end()?;
                Ok(value)
            }
            Err(e) => {
                if txn.state() == TxnState::Active {
                    if let Err(abort) = txn.abort() {
                        warn!(txn_id = %txn.id(), error = %abort, "abort after failed action");
                    }
                }
                end_quietly(&mut txn);
                Err(e)
            }
        }
    }
}

/// Ends `txn` without letting its error replace the one being returned.
fn end_quietly(txn: &mut Transaction) {
    if let Err(e) = txn.end() {
        warn!(txn_id = %txn.id(), error = %e, "end after failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug)]
    enum AppError {
        Txn(TxnError),
        Rejected,
    }

    impl From<TxnError> for AppError {
        fn from(e: TxnError) -> Self {
            Self::Txn(e)
        }
    }

    fn base() -> TransactionalBase {
        let coordinator = TransactionCoordinator::in_memory();
        coordinator.start().unwrap();
        TransactionalBase::new(coordinator)
    }

    #[test]
    fn read_always_ends() {
        let base = base();
        let mode = base
            .calculate_read(|txn| Ok::<_, TxnError>(txn.is_write()))
            .unwrap();
        assert!(!mode);

        let failed = base.execute_read(|_| Err::<(), _>(AppError::Rejected));
        assert!(matches!(failed, Err(AppError::Rejected)));

        let coordinator = base.coordinator();
        assert_eq!(coordinator.count_active(), 0);
        assert_eq!(coordinator.count_begin(), coordinator.count_finished());
    }

    #[test]
    fn write_commits_on_ok() {
        let base = base();
        base.execute_write(|txn| {
            assert!(txn.is_write());
            Ok::<_, TxnError>(())
        })
        .unwrap();

        let stats = base.coordinator().stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.aborted, 0);
        assert_eq!(base.coordinator().count_active(), 0);
    }

    #[test]
    fn write_aborts_on_err() {
        let base = base();
        let result = base.calculate_write(|_| Err::<u32, _>(AppError::Rejected));
        assert!(matches!(result, Err(AppError::Rejected)));

        let stats = base.coordinator().stats();
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.aborted, 1);
        assert_eq!(base.coordinator().count_active(), 0);
    }

    #[test]
    fn action_may_abort_itself() {
        let base = base();
        let result = base.execute_write(|txn| {
            txn.abort()?;
            Err::<(), _>(AppError::Rejected)
        });
        assert!(matches!(result, Err(AppError::Rejected)));
        assert_eq!(base.coordinator().stats().aborted, 1);
    }

    #[test]
    fn begin_errors_convert() {
        let coordinator = TransactionCoordinator::in_memory();
        let base = TransactionalBase::new(coordinator);
        let result = base.execute_read(|_| Ok::<(), AppError>(()));
        assert!(matches!(result, Err(AppError::Txn(TxnError::NotStarted))));
    }

    #[test]
    fn panic_still_releases_writer() {
        let base = base();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            base.execute_write(|_| -> Result<(), TxnError> { panic!("action blew up") })
        }));
        assert!(outcome.is_err());

        let coordinator = base.coordinator();
        assert_eq!(coordinator.count_active(), 0);
        assert!(coordinator.try_begin(TxnType::Write).unwrap().is_some());
    }
}
