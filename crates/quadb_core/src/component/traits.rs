//! The capability interface the coordinator drives.

use crate::component::ComponentId;
use crate::error::TxnResult;
use crate::types::{Generation, TxnContext};

/// A storage unit whose changes take part in coordinated transactions.
///
/// Index trees, node tables and data files implement this trait; the
/// coordinator calls it in registration order.
///
/// # Commit protocol
///
/// 1. `prepare_commit` on every component. The returned bytes are journaled
///    under [`component_id`](Self::component_id). Nothing may become visible
///    outside the transaction yet.
/// 2. The journal records the commit group and syncs.
/// 3. `commit` on every component. The changes become visible as generation
///    `ctx.generation.next()`. When the coordinator truncates the journal
///    after each commit, a component must be durable on its own once
///    `commit` returns.
/// 4. `complete` on every component.
///
/// A failure in step 1 aborts the transaction everywhere. A failure in step
/// 3 is fatal: the journal already says the transaction committed, so the
/// coordinator stops admitting transactions and the next start replays it.
///
/// # Recovery
///
/// On start the coordinator calls `clean_start` if the journal is empty;
/// otherwise `start_recovery`, then `recover` once per journaled entry of
/// each complete commit group, then `finish_recovery`. `recover` must be
/// idempotent: replaying an entry that was already applied writes the same
/// final state again.
pub trait TransactionalComponent: Send + Sync {
    /// Identity used to route journal entries back to this component.
    fn component_id(&self) -> ComponentId;

    /// Called instead of recovery when the journal is empty.
    fn clean_start(&self) -> TxnResult<()> {
        Ok(())
    }

    /// Called once before the first `recover`.
    fn start_recovery(&self) -> TxnResult<()> {
        Ok(())
    }

    /// Re-applies one journaled redo payload.
    fn recover(&self, payload: &[u8]) -> TxnResult<()>;

    /// Called once after the last `recover`.
    fn finish_recovery(&self) -> TxnResult<()> {
        Ok(())
    }

    /// A transaction was admitted.
    fn begin(&self, _ctx: &TxnContext) -> TxnResult<()> {
        Ok(())
    }

    /// A transaction gained write access. `ctx.generation` may have moved.
    fn promote(&self, _ctx: &TxnContext) -> TxnResult<()> {
        Ok(())
    }

    /// Phase one: returns the redo bytes to journal, or `None` if this
    /// component has nothing to record for the transaction.
    fn prepare_commit(&self, ctx: &TxnContext) -> TxnResult<Option<Vec<u8>>>;

    /// Phase two: makes the prepared changes visible.
    fn commit(&self, ctx: &TxnContext) -> TxnResult<()>;

    /// Discards everything buffered for the transaction.
    fn abort(&self, ctx: &TxnContext) -> TxnResult<()>;

    /// Releases transaction-local resources after commit or abort.
    fn complete(&self, _ctx: &TxnContext) -> TxnResult<()> {
        Ok(())
    }

    /// No active transaction reads `generation` any more and a later one
    /// has been committed, so data only it needed may be reclaimed.
    fn generation_released(&self, _generation: Generation) {}

    /// The coordinator is shutting down.
    fn shutdown(&self) -> TxnResult<()> {
        Ok(())
    }
}
