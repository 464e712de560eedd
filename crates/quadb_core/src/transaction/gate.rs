//! Admission gates.
//!
//! Two independent gates decide whether `begin` may proceed:
//!
//! - [`ExclusivityGate`]: every transaction holds the shared side for its
//!   lifetime; maintenance holds the exclusive side while nothing else runs.
//! - [`WriterGate`]: a single permit held by the one write-capable
//!   transaction, or by whoever disabled writers.

use crate::error::{TxnError, TxnResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct ExclusivityState {
    /// Shared entries per thread that made them.
    shared: HashMap<ThreadId, usize>,
    exclusive: Option<ThreadId>,
    exclusive_waiting: usize,
}

impl ExclusivityState {
    fn shared_total(&self) -> usize {
        self.shared.values().sum()
    }
}

/// Many transactions, or one maintenance operation.
///
/// Blocked exclusive acquirers take priority: while one waits, new shared
/// entries wait (or are refused) too, so a steady stream of readers cannot
/// starve maintenance. A thread that already holds a shared entry is still
/// admitted, so a thread juggling two transactions cannot deadlock against
/// a waiting acquirer. The thread holding exclusive mode may also begin
/// transactions of its own.
#[derive(Debug, Default)]
pub struct ExclusivityGate {
    state: Mutex<ExclusivityState>,
    changed: Condvar,
}

impl ExclusivityGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one transaction for the calling thread.
    ///
    /// Returns the thread the entry is booked to, which must be handed back
    /// to [`exit_shared`](Self::exit_shared), or `None` if refused without
    /// blocking.
    pub fn enter_shared(&self, can_block: bool) -> Option<ThreadId> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let admitted = match state.exclusive {
                Some(owner) => owner == me,
                None => state.exclusive_waiting == 0 || state.shared.contains_key(&me),
            };
            if admitted {
                *state.shared.entry(me).or_default() += 1;
                return Some(me);
            }
            if !can_block {
                return None;
            }
            self.changed.wait(&mut state);
        }
    }

    /// Unregisters one transaction booked to `holder`.
    ///
    /// The call may come from any thread.
    pub fn exit_shared(&self, holder: ThreadId) -> TxnResult<()> {
        let mut state = self.state.lock();
        match state.shared.get_mut(&holder) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.shared.remove(&holder);
            }
            None => {
                return Err(TxnError::gate_mismatch("shared exit without a matching enter"));
            }
        }
        if state.shared.is_empty() {
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Takes exclusive mode once no transaction is registered.
    ///
    /// Returns `Ok(false)` if `can_block` is false and the gate is busy.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::GateMismatch`] if the calling thread already holds
    /// exclusive mode.
    pub fn enter_exclusive(&self, can_block: bool) -> TxnResult<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive == Some(me) {
            return Err(TxnError::gate_mismatch("exclusive mode already held by this thread"));
        }
        if state.exclusive.is_none() && state.shared.is_empty() {
            state.exclusive = Some(me);
            return Ok(true);
        }
        if !can_block {
            return Ok(false);
        }

        state.exclusive_waiting += 1;
        while state.exclusive.is_some() || !state.shared.is_empty() {
            self.changed.wait(&mut state);
        }
        state.exclusive_waiting -= 1;
        state.exclusive = Some(me);
        Ok(true)
    }

    /// Leaves exclusive mode.
    pub fn exit_exclusive(&self) -> TxnResult<()> {
        let mut state = self.state.lock();
        if state.exclusive.take().is_none() {
            return Err(TxnError::gate_mismatch("exclusive mode is not held"));
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Returns true while exclusive mode is held.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive.is_some()
    }

    /// Number of registered transactions.
    #[must_use]
    pub fn shared_count(&self) -> usize {
        self.state.lock().shared_total()
    }
}

/// Who holds the writer permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterHolder {
    /// A write transaction, or a promoted one.
    Transaction,
    /// Writers were disabled for maintenance.
    Maintenance,
}

/// The single writer permit.
#[derive(Debug, Default)]
pub struct WriterGate {
    holder: Mutex<Option<WriterHolder>>,
    changed: Condvar,
}

impl WriterGate {
    /// Creates a gate with its permit available.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the permit for `holder`. Returns `false` if refused without
    /// blocking.
    pub fn acquire(&self, holder: WriterHolder, can_block: bool) -> bool {
        let mut current = self.holder.lock();
        while current.is_some() {
            if !can_block {
                return false;
            }
            self.changed.wait(&mut current);
        }
        *current = Some(holder);
        true
    }

    /// Returns the permit taken by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::GateMismatch`] if the permit is free or held by
    /// the other kind of holder.
    pub fn release(&self, holder: WriterHolder) -> TxnResult<()> {
        let mut current = self.holder.lock();
        match *current {
            Some(taken) if taken == holder => {}
            Some(taken) => {
                return Err(TxnError::gate_mismatch(format!(
                    "writer permit is held by {taken:?}, not {holder:?}"
                )));
            }
            None => return Err(TxnError::gate_mismatch("writer permit released twice")),
        }
        *current = None;
        self.changed.notify_one();
        Ok(())
    }

    /// Returns true if nobody holds the permit.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.holder.lock().is_none()
    }

    /// Returns the current holder.
    #[must_use]
    pub fn holder(&self) -> Option<WriterHolder> {
        *self.holder.lock()
    }
}
