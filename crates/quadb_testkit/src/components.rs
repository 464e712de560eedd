//! Mock transactional components.
//!
//! - [`CellComponent`] holds one integer with a version per generation, so
//!   readers pinned to an old generation keep seeing the old value
//! - [`FaultyComponent`] fails chosen callbacks on demand and records every
//!   call it receives

use parking_lot::{Mutex, RwLock};
use quadb_core::{
    ComponentId, Generation, Transaction, TransactionalComponent, TxnContext, TxnError, TxnId,
    TxnResult, TxnState,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// An integer cell with snapshot reads.
///
/// Each commit that wrote the cell stores the new value under the generation
/// the commit publishes. A transaction reads the newest version at or below
/// its own generation, or its own uncommitted write.
///
/// # Example
///
/// ```rust
/// use quadb_core::{ComponentId, TransactionCoordinator, TxnType};
/// use quadb_testkit::CellComponent;
/// use uuid::Uuid;
///
/// let cell = CellComponent::new(ComponentId::new(Uuid::nil(), 1), 3);
/// let coordinator = TransactionCoordinator::in_memory();
/// coordinator.add(cell.clone()).unwrap();
/// coordinator.start().unwrap();
///
/// let mut txn = coordinator.begin(TxnType::Write).unwrap();
/// cell.increment(&txn).unwrap();
/// txn.commit().unwrap();
/// txn.end().unwrap();
/// assert_eq!(cell.committed(), 4);
/// ```
#[derive(Debug)]
pub struct CellComponent {
    id: ComponentId,
    versions: RwLock<BTreeMap<Generation, i64>>,
    pending: Mutex<HashMap<TxnId, i64>>,
    released: Mutex<Vec<Generation>>,
    recovered: Mutex<Vec<i64>>,
}

impl CellComponent {
    /// Creates a cell holding `initial` at generation 0.
    pub fn new(id: ComponentId, initial: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            versions: RwLock::new(BTreeMap::from([(Generation::new(0), initial)])),
            pending: Mutex::new(HashMap::new()),
            released: Mutex::new(Vec::new()),
            recovered: Mutex::new(Vec::new()),
        })
    }

    /// Reads the value `txn` sees.
    pub fn get(&self, txn: &Transaction) -> i64 {
        if let Some(value) = self.pending.lock().get(&txn.id()) {
            return *value;
        }
        self.value_at(txn.generation())
    }

    /// Stages a write.
    ///
    /// # Errors
    ///
    /// Fails unless `txn` is active and currently holds write access.
    pub fn set(&self, txn: &Transaction, value: i64) -> TxnResult<()> {
        if !txn.is_write() || txn.state() != TxnState::Active {
            return Err(TxnError::component(format!(
                "{} cannot write (mode {:?}, state {})",
                txn.id(),
                txn.mode(),
                txn.state()
            )));
        }
        self.pending.lock().insert(txn.id(), value);
        Ok(())
    }

    /// Stages `get + 1` and returns it.
    pub fn increment(&self, txn: &Transaction) -> TxnResult<i64> {
        let next = self.get(txn) + 1;
        self.set(txn, next)?;
        Ok(next)
    }

    /// Value committed at `generation`, as a reader pinned there sees it.
    pub fn value_at(&self, generation: Generation) -> i64 {
        self.versions
            .read()
            .range(..=generation)
            .next_back()
            .map_or(0, |(_, v)| *v)
    }

    /// Latest committed value.
    pub fn committed(&self) -> i64 {
        self.versions
            .read()
            .values()
            .next_back()
            .copied()
            .unwrap_or(0)
    }

    /// Number of stored versions.
    pub fn version_count(&self) -> usize {
        self.versions.read().len()
    }

    /// Generations the coordinator reported as released, in order.
    pub fn released_generations(&self) -> Vec<Generation> {
        self.released.lock().clone()
    }

    /// Values applied by recovery, in journal order.
    pub fn recovered_values(&self) -> Vec<i64> {
        self.recovered.lock().clone()
    }

    /// Returns true if some transaction has an uncommitted write.
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

fn decode_value(payload: &[u8]) -> TxnResult<i64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| TxnError::component(format!("cell payload of {} bytes", payload.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

impl TransactionalComponent for CellComponent {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn recover(&self, payload: &[u8]) -> TxnResult<()> {
        let value = decode_value(payload)?;
        // History before a restart is gone; the replayed value is all there is.
        *self.versions.write() = BTreeMap::from([(Generation::new(0), value)]);
        self.recovered.lock().push(value);
        Ok(())
    }

    fn prepare_commit(&self, ctx: &TxnContext) -> TxnResult<Option<Vec<u8>>> {
        Ok(self
            .pending
            .lock()
            .get(&ctx.id)
            .map(|v| v.to_le_bytes().to_vec()))
    }

    fn commit(&self, ctx: &TxnContext) -> TxnResult<()> {
        if let Some(value) = self.pending.lock().remove(&ctx.id) {
            self.versions.write().insert(ctx.generation.next(), value);
        }
        Ok(())
    }

    fn abort(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.pending.lock().remove(&ctx.id);
        Ok(())
    }

    fn generation_released(&self, generation: Generation) {
        self.released.lock().push(generation);
    }
}

/// A callback of [`TransactionalComponent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// `clean_start`
    CleanStart,
    /// `start_recovery`
    StartRecovery,
    /// `recover`
    Recover,
    /// `finish_recovery`
    FinishRecovery,
    /// `begin`
    Begin,
    /// `promote`
    Promote,
    /// `prepare_commit`
    Prepare,
    /// `commit`
    Commit,
    /// `abort`
    Abort,
    /// `complete`
    Complete,
    /// `shutdown`
    Shutdown,
}

/// A component that fails chosen hooks and records every call.
///
/// It journals a fixed redo payload for every write transaction so that
/// recovery has something to hand back.
#[derive(Debug)]
pub struct FaultyComponent {
    id: ComponentId,
    redo: Vec<u8>,
    faults: Mutex<HashSet<Hook>>,
    calls: Mutex<Vec<(Hook, Option<TxnId>)>>,
    recovered: Mutex<Vec<Vec<u8>>>,
}

impl FaultyComponent {
    /// Creates a component that journals `redo` on every write commit.
    pub fn new(id: ComponentId, redo: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            redo: redo.into(),
            faults: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            recovered: Mutex::new(Vec::new()),
        })
    }

    /// Makes `hook` fail from now on.
    pub fn inject(&self, hook: Hook) {
        self.faults.lock().insert(hook);
    }

    /// Stops failing `hook`.
    pub fn heal(&self, hook: Hook) {
        self.faults.lock().remove(&hook);
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<(Hook, Option<TxnId>)> {
        self.calls.lock().clone()
    }

    /// Hooks called for `txn`, in order.
    pub fn calls_for(&self, txn: TxnId) -> Vec<Hook> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, id)| *id == Some(txn))
            .map(|(hook, _)| *hook)
            .collect()
    }

    /// How often `hook` was called.
    pub fn count(&self, hook: Hook) -> usize {
        self.calls.lock().iter().filter(|(h, _)| *h == hook).count()
    }

    /// Payloads handed to `recover`.
    pub fn recovered(&self) -> Vec<Vec<u8>> {
        self.recovered.lock().clone()
    }

    fn call(&self, hook: Hook, txn: Option<TxnId>) -> TxnResult<()> {
        self.calls.lock().push((hook, txn));
        if self.faults.lock().contains(&hook) {
            return Err(TxnError::component(format!("injected {hook:?} failure")));
        }
        Ok(())
    }
}

impl TransactionalComponent for FaultyComponent {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn clean_start(&self) -> TxnResult<()> {
        self.call(Hook::CleanStart, None)
    }

    fn start_recovery(&self) -> TxnResult<()> {
        self.call(Hook::StartRecovery, None)
    }

    fn recover(&self, payload: &[u8]) -> TxnResult<()> {
        self.call(Hook::Recover, None)?;
        self.recovered.lock().push(payload.to_vec());
        Ok(())
    }

    fn finish_recovery(&self) -> TxnResult<()> {
        self.call(Hook::FinishRecovery, None)
    }

    fn begin(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.call(Hook::Begin, Some(ctx.id))
    }

    fn promote(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.call(Hook::Promote, Some(ctx.id))
    }

    fn prepare_commit(&self, ctx: &TxnContext) -> TxnResult<Option<Vec<u8>>> {
        self.call(Hook::Prepare, Some(ctx.id))?;
        Ok(Some(self.redo.clone()))
    }

    fn commit(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.call(Hook::Commit, Some(ctx.id))
    }

    fn abort(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.call(Hook::Abort, Some(ctx.id))
    }

    fn complete(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.call(Hook::Complete, Some(ctx.id))
    }

    fn shutdown(&self) -> TxnResult<()> {
        self.call(Hook::Shutdown, None)
    }
}
