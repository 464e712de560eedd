//! Transaction lifecycle listeners.

use crate::types::TxnContext;

/// Observer of transaction lifecycle events.
///
/// Every method has an empty default, so a listener implements only what it
/// needs. Callbacks run on the thread driving the transaction, outside the
/// coordinator's internal locks.
pub trait TransactionListener: Send + Sync {
    /// A transaction was admitted.
    fn on_begin(&self, _ctx: &TxnContext) {}
    /// Promotion is about to be attempted.
    fn on_promote_start(&self, _ctx: &TxnContext) {}
    /// Promotion finished; `promoted` tells whether it succeeded.
    fn on_promote_finish(&self, _ctx: &TxnContext, _promoted: bool) {}
    /// Phase one of commit is starting.
    fn on_prepare_start(&self, _ctx: &TxnContext) {}
    /// Every component prepared.
    fn on_prepare_finish(&self, _ctx: &TxnContext) {}
    /// Phase two of commit is starting.
    fn on_commit_start(&self, _ctx: &TxnContext) {}
    /// The transaction committed.
    fn on_commit_finish(&self, _ctx: &TxnContext) {}
    /// Rollback is starting.
    fn on_abort_start(&self, _ctx: &TxnContext) {}
    /// Rollback finished.
    fn on_abort_finish(&self, _ctx: &TxnContext) {}
    /// The transaction released its resources.
    fn on_end(&self, _ctx: &TxnContext) {}
}
