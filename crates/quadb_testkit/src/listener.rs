//! A listener that records lifecycle events.

use parking_lot::Mutex;
use quadb_core::{TransactionListener, TxnContext, TxnId};
use std::sync::Arc;

/// A lifecycle event seen by [`RecordingListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `on_begin`
    Begin,
    /// `on_promote_start`
    PromoteStart,
    /// `on_promote_finish`; carries whether promotion succeeded.
    PromoteFinish(bool),
    /// `on_prepare_start`
    PrepareStart,
    /// `on_prepare_finish`
    PrepareFinish,
    /// `on_commit_start`
    CommitStart,
    /// `on_commit_finish`
    CommitFinish,
    /// `on_abort_start`
    AbortStart,
    /// `on_abort_finish`
    AbortFinish,
    /// `on_end`
    End,
}

/// Records every event with the transaction it belongs to.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(TxnId, Event)>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Events for `txn`, in order.
    pub fn events_for(&self, txn: TxnId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| *id == txn)
            .map(|(_, e)| *e)
            .collect()
    }

    /// Number of times `event` was seen, across transactions.
    pub fn count(&self, event: Event) -> usize {
        self.events.lock().iter().filter(|(_, e)| *e == event).count()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, ctx: &TxnContext, event: Event) {
        self.events.lock().push((ctx.id, event));
    }
}

impl TransactionListener for RecordingListener {
    fn on_begin(&self, ctx: &TxnContext) {
        self.push(ctx, Event::Begin);
    }

    fn on_promote_start(&self, ctx: &TxnContext) {
        self.push(ctx, Event::PromoteStart);
    }

    fn on_promote_finish(&self, ctx: &TxnContext, promoted: bool) {
        self.push(ctx, Event::PromoteFinish(promoted));
    }

    fn on_prepare_start(&self, ctx: &TxnContext) {
        self.push(ctx, Event::PrepareStart);
    }

    fn on_prepare_finish(&self, ctx: &TxnContext) {
        self.push(ctx, Event::PrepareFinish);
    }

    fn on_commit_start(&self, ctx: &TxnContext) {
        self.push(ctx, Event::CommitStart);
    }

    fn on_commit_finish(&self, ctx: &TxnContext) {
        self.push(ctx, Event::CommitFinish);
    }

    fn on_abort_start(&self, ctx: &TxnContext) {
        self.push(ctx, Event::AbortStart);
    }

    fn on_abort_finish(&self, ctx: &TxnContext) {
        self.push(ctx, Event::AbortFinish);
    }

    fn on_end(&self, ctx: &TxnContext) {
        self.push(ctx, Event::End);
    }
}
