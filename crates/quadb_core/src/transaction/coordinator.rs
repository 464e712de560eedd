//! Transaction coordinator.

use crate::component::{ComponentId, TransactionalComponent};
use crate::config::CoordinatorConfig;
use crate::error::{TxnError, TxnResult};
use crate::journal::{CommitGroup, Journal, JournalReplay};
use crate::stats::{CoordinatorStats, CoordinatorStatsSnapshot};
use crate::transaction::gate::{ExclusivityGate, WriterGate, WriterHolder};
use crate::transaction::generation::GenerationTracker;
use crate::transaction::listener::TransactionListener;
use crate::transaction::state::{Transaction, TxnRecord};
use crate::types::{Generation, ReadWrite, TxnId, TxnState, TxnType};
use parking_lot::{Mutex, RwLock};
use quadb_storage::{InMemoryBackend, StorageBackend};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, error, info, warn};

#[cfg(feature = "std")]
use crate::dir::StoreDir;

type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Keeps the store directory locked for the coordinator's lifetime.
#[cfg(feature = "std")]
type DirGuard = Option<StoreDir>;
#[cfg(not(feature = "std"))]
type DirGuard = ();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    ShutDown,
}

/// Active transactions and generation pins, guarded by one short-lived lock.
#[derive(Debug, Default)]
struct Registry {
    active: HashMap<TxnId, ReadWrite>,
    readers: usize,
    writers: usize,
    generations: GenerationTracker,
}

impl Registry {
    fn count_mode(&mut self, mode: ReadWrite, delta: isize) {
        let slot = match mode {
            ReadWrite::Read => &mut self.readers,
            ReadWrite::Write => &mut self.writers,
        };
        *slot = slot.saturating_add_signed(delta);
    }
}

/// State shared between the coordinator handle and its transactions.
pub(crate) struct CoordinatorCore {
    config: RwLock<CoordinatorConfig>,
    config_locked: AtomicBool,
    components: RwLock<Vec<Arc<dyn TransactionalComponent>>>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    journal: Journal,
    exclusivity: ExclusivityGate,
    writers: WriterGate,
    registry: Mutex<Registry>,
    stats: CoordinatorStats,
    next_txn_id: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    poisoned: AtomicBool,
    _dir: DirGuard,
}

/// Admits, commits and recovers transactions over a set of components.
///
/// ## Admission
///
/// Every transaction holds the shared side of the exclusivity gate for its
/// lifetime. A write-capable transaction also holds the single writer
/// permit: `WRITE` from begin, the promote types from a successful
/// [`Transaction::promote`]. Readers never touch the writer permit, so
/// readers and the writer never wait for each other.
///
/// ## Commit
///
/// Commits are serialized by the writer permit. Each runs prepare on every
/// component in registration order, appends one journal group and syncs it,
/// then runs commit on every component and publishes the next generation.
///
/// ## Recovery
///
/// [`start`](Self::start) replays every complete journal group into the
/// components and discards a trailing incomplete one.
///
/// # Example
///
/// ```rust
/// use quadb_core::{TransactionCoordinator, TxnType};
///
/// let coordinator = TransactionCoordinator::in_memory();
/// coordinator.start()?;
///
/// let mut reader = coordinator.begin(TxnType::Read)?;
/// let mut writer = coordinator.try_begin(TxnType::Write)?.expect("no other writer");
/// assert!(coordinator.try_begin(TxnType::Write)?.is_none());
///
/// writer.commit()?;
/// writer.end()?;
/// reader.end()?;
/// assert_eq!(coordinator.count_begin(), coordinator.count_finished());
/// # Ok::<(), quadb_core::TxnError>(())
/// ```
#[derive(Clone)]
pub struct TransactionCoordinator {
    core: Arc<CoordinatorCore>,
}

impl TransactionCoordinator {
    /// Creates a coordinator over an existing journal.
    pub fn new(journal: Journal, config: CoordinatorConfig) -> Self {
        Self::build(journal, config, DirGuard::default())
    }

    /// Creates a coordinator whose journal lives on `backend`.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: CoordinatorConfig) -> Self {
        Self::new(Journal::new(backend), config)
    }

    /// Creates a coordinator with an in-memory journal and default config.
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(InMemoryBackend::new()), CoordinatorConfig::default())
    }

    /// Opens a coordinator over a store directory.
    ///
    /// The directory stays locked until the coordinator and every
    /// transaction it handed out are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::StoreLocked`] if another coordinator holds the
    /// directory, or an error if it cannot be created or opened.
    #[cfg(feature = "std")]
    pub fn open(path: &std::path::Path, config: CoordinatorConfig) -> TxnResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = dir.open_journal_backend()?;
        Ok(Self::build(Journal::new(Box::new(backend)), config, Some(dir)))
    }

    fn build(journal: Journal, config: CoordinatorConfig, dir: DirGuard) -> Self {
        Self {
            core: Arc::new(CoordinatorCore {
                config: RwLock::new(config),
                config_locked: AtomicBool::new(false),
                components: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                shutdown_hooks: Mutex::new(Vec::new()),
                journal,
                exclusivity: ExclusivityGate::new(),
                writers: WriterGate::new(),
                registry: Mutex::new(Registry::default()),
                stats: CoordinatorStats::new(),
                next_txn_id: AtomicU64::new(1),
                lifecycle: Mutex::new(Lifecycle::Created),
                poisoned: AtomicBool::new(false),
                _dir: dir,
            }),
        }
    }

    // === Configuration ===

    /// Registers a component. Components commit in registration order.
    ///
    /// # Errors
    ///
    /// [`TxnError::ConfigurationLocked`] after `start` (outside
    /// [`modify_config`](Self::modify_config)); an error if a component with
    /// the same id is already registered.
    pub fn add(&self, component: Arc<dyn TransactionalComponent>) -> TxnResult<()> {
        self.check_unlocked()?;
        let id = component.component_id();
        let mut components = self.core.components.write();
        if components.iter().any(|c| c.component_id() == id) {
            return Err(TxnError::component(format!("component {id} already registered")));
        }
        debug!(component = %id, "component registered");
        components.push(component);
        Ok(())
    }

    /// Unregisters a component, returning it if it was present.
    pub fn remove(&self, id: ComponentId) -> TxnResult<Option<Arc<dyn TransactionalComponent>>> {
        self.check_unlocked()?;
        let mut components = self.core.components.write();
        let position = components.iter().position(|c| c.component_id() == id);
        Ok(position.map(|i| components.remove(i)))
    }

    /// Ids of the registered components, in registration order.
    #[must_use]
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.core
            .components
            .read()
            .iter()
            .map(|c| c.component_id())
            .collect()
    }

    /// Registers a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.core.listeners.write().push(listener);
    }

    /// Registers a hook that runs once during [`shutdown`](Self::shutdown).
    pub fn add_shutdown_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.shutdown_hooks.lock().push(Box::new(hook));
    }

    /// Returns a copy of the configuration.
    #[must_use]
    pub fn config(&self) -> CoordinatorConfig {
        self.core.config.read().clone()
    }

    /// Replaces the configuration.
    ///
    /// # Errors
    ///
    /// [`TxnError::ConfigurationLocked`] after `start` (outside
    /// [`modify_config`](Self::modify_config)).
    pub fn set_config(&self, config: CoordinatorConfig) -> TxnResult<()> {
        self.check_unlocked()?;
        *self.core.config.write() = config;
        Ok(())
    }

    /// Runs `action` in exclusive mode with configuration unlocked.
    ///
    /// Waits until no transaction is active, so components, listeners and
    /// configuration can change safely.
    pub fn modify_config<T, F>(&self, action: F) -> TxnResult<T>
    where
        F: FnOnce(&TransactionCoordinator) -> TxnResult<T>,
    {
        let _exclusive = ExclusiveGuard::enter(&self.core.exclusivity)?;
        let was_locked = self.core.config_locked.swap(false, Ordering::SeqCst);
        let result = action(self);
        self.core.config_locked.store(was_locked, Ordering::SeqCst);
        result
    }

    fn check_unlocked(&self) -> TxnResult<()> {
        if self.core.config_locked.load(Ordering::SeqCst) {
            return Err(TxnError::ConfigurationLocked);
        }
        Ok(())
    }

    // === Lifecycle ===

    /// Recovers from the journal and starts admitting transactions.
    ///
    /// An empty journal means a clean start: every component gets
    /// `clean_start`. Otherwise every complete commit group is replayed in
    /// journal order and a trailing incomplete group is discarded.
    ///
    /// # Errors
    ///
    /// - [`TxnError::UnknownComponent`] if the journal holds an entry for a
    ///   component that is not registered
    /// - journal corruption and checksum errors
    /// - a lifecycle error if already started
    pub fn start(&self) -> TxnResult<()> {
        let mut lifecycle = self.core.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started => return Err(TxnError::lifecycle("coordinator already started")),
            Lifecycle::ShutDown => return Err(TxnError::ShutDown),
        }

        let components = self.core.components();
        self.core.recover(&components)?;

        self.core.config_locked.store(true, Ordering::SeqCst);
        *lifecycle = Lifecycle::Started;
        info!(
            components = components.len(),
            generation = %self.current_generation(),
            "transaction coordinator started"
        );
        Ok(())
    }

    /// Stops the coordinator. Calling it again is a no-op.
    ///
    /// Components get `shutdown`, then the shutdown hooks run, then the
    /// journal is synced. Active transactions are logged, not waited for.
    pub fn shutdown(&self) -> TxnResult<()> {
        {
            let mut lifecycle = self.core.lifecycle.lock();
            if *lifecycle == Lifecycle::ShutDown {
                return Ok(());
            }
            *lifecycle = Lifecycle::ShutDown;
        }

        let active = self.count_active();
        if active > 0 {
            warn!(active, "shutting down with active transactions");
        }

        for component in self.core.components() {
            if let Err(e) = component.shutdown() {
                warn!(component = %component.component_id(), error = %e, "component shutdown failed");
            }
        }

        let hooks: Vec<ShutdownHook> = self.core.shutdown_hooks.lock().drain(..).collect();
        for hook in hooks {
            hook();
        }

        let synced = self.core.journal.sync();
        info!("transaction coordinator shut down");
        synced
    }

    /// Returns true between `start` and `shutdown`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.core.lifecycle.lock() == Lifecycle::Started
    }

    /// Returns true after a fatal commit failure.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.core.poisoned.load(Ordering::SeqCst)
    }

    // === Admission ===

    /// Begins a transaction, waiting as long as admission requires.
    pub fn begin(&self, txn_type: TxnType) -> TxnResult<Transaction> {
        self.begin_with(txn_type, true)?
            .ok_or_else(|| TxnError::lifecycle("blocking begin returned without admission"))
    }

    /// Begins a transaction if it can be admitted right now.
    ///
    /// `Ok(None)` means "not now" (exclusive mode, another writer, or
    /// writers disabled).
    pub fn try_begin(&self, txn_type: TxnType) -> TxnResult<Option<Transaction>> {
        self.begin_with(txn_type, false)
    }

    /// Begins a transaction, blocking only if `can_block`.
    pub fn begin_with(&self, txn_type: TxnType, can_block: bool) -> TxnResult<Option<Transaction>> {
        CoordinatorCore::begin(&self.core, txn_type, can_block)
    }

    // === Writer gate ===

    /// Blocks new writers and promotions, waiting for the active writer.
    pub fn disable_writers(&self) {
        self.core.writers.acquire(WriterHolder::Maintenance, true);
        debug!("writers disabled");
    }

    /// Like [`disable_writers`](Self::disable_writers); returns `false`
    /// instead of waiting if `can_block` is false and a writer is active.
    pub fn try_disable_writers(&self, can_block: bool) -> bool {
        let disabled = self.core.writers.acquire(WriterHolder::Maintenance, can_block);
        if disabled {
            debug!("writers disabled");
        }
        disabled
    }

    /// Re-admits writers.
    ///
    /// # Errors
    ///
    /// [`TxnError::GateMismatch`] if writers were not disabled, including
    /// while a write transaction holds the permit.
    pub fn enable_writers(&self) -> TxnResult<()> {
        self.core.writers.release(WriterHolder::Maintenance)?;
        debug!("writers enabled");
        Ok(())
    }

    /// Drains writers so the store can be read as a whole (backup, copy).
    pub fn start_read_only_database(&self) {
        self.disable_writers();
    }

    /// Ends [`start_read_only_database`](Self::start_read_only_database).
    pub fn finish_read_only_database(&self) -> TxnResult<()> {
        self.enable_writers()
    }

    /// Runs `action` while no writer can be active.
    pub fn exec_as_writer<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _permit = WriterPermit::acquire(&self.core.writers);
        action()
    }

    // === Exclusivity gate ===

    /// Waits for every transaction to end, then blocks new ones.
    ///
    /// The calling thread may still begin transactions of its own.
    pub fn start_exclusive_mode(&self) -> TxnResult<()> {
        self.core.exclusivity.enter_exclusive(true)?;
        debug!("exclusive mode started");
        Ok(())
    }

    /// Enters exclusive mode; with `can_block` false, returns `Ok(false)`
    /// instead of waiting.
    pub fn try_exclusive_mode(&self, can_block: bool) -> TxnResult<bool> {
        let entered = self.core.exclusivity.enter_exclusive(can_block)?;
        if entered {
            debug!("exclusive mode started");
        }
        Ok(entered)
    }

    /// Leaves exclusive mode.
    pub fn finish_exclusive_mode(&self) -> TxnResult<()> {
        self.core.exclusivity.exit_exclusive()?;
        debug!("exclusive mode finished");
        Ok(())
    }

    /// Runs `action` in exclusive mode.
    pub fn exec_exclusive<T, F>(&self, action: F) -> TxnResult<T>
    where
        F: FnOnce() -> T,
    {
        let _exclusive = ExclusiveGuard::enter(&self.core.exclusivity)?;
        Ok(action())
    }

    /// Returns true while exclusive mode is held.
    #[must_use]
    pub fn is_exclusive_mode(&self) -> bool {
        self.core.exclusivity.is_exclusive()
    }

    // === Introspection ===

    /// Number of transactions begun and not yet ended.
    #[must_use]
    pub fn count_active(&self) -> usize {
        self.core.registry.lock().active.len()
    }

    /// Active transactions in read mode.
    #[must_use]
    pub fn count_active_readers(&self) -> usize {
        self.core.registry.lock().readers
    }

    /// Active transactions in write mode (zero or one).
    #[must_use]
    pub fn count_active_writers(&self) -> usize {
        self.core.registry.lock().writers
    }

    /// Transactions admitted since creation.
    #[must_use]
    pub fn count_begin(&self) -> u64 {
        self.core.stats.begins()
    }

    /// READ transactions admitted since creation.
    #[must_use]
    pub fn count_begin_read(&self) -> u64 {
        self.core.stats.begins_read()
    }

    /// Write-capable transactions admitted since creation.
    #[must_use]
    pub fn count_begin_write(&self) -> u64 {
        self.core.stats.begins_write()
    }

    /// Transactions ended since creation.
    #[must_use]
    pub fn count_finished(&self) -> u64 {
        self.core.stats.finished()
    }

    /// The latest committed generation.
    #[must_use]
    pub fn current_generation(&self) -> Generation {
        self.core.current_generation()
    }

    /// Number of active transactions reading `generation`.
    #[must_use]
    pub fn generation_refcount(&self, generation: Generation) -> usize {
        self.core.registry.lock().generations.refcount(generation)
    }

    /// Oldest generation some active transaction still reads.
    #[must_use]
    pub fn oldest_active_generation(&self) -> Option<Generation> {
        self.core.registry.lock().generations.oldest_active()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.core.stats.snapshot()
    }

    /// The coordinator's journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.core.journal
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("lifecycle", &*self.core.lifecycle.lock())
            .field("generation", &self.current_generation())
            .field("active", &self.count_active())
            .finish_non_exhaustive()
    }
}

/// Holds exclusive mode until dropped.
struct ExclusiveGuard<'a>(&'a ExclusivityGate);

impl<'a> ExclusiveGuard<'a> {
    fn enter(gate: &'a ExclusivityGate) -> TxnResult<Self> {
        gate.enter_exclusive(true)?;
        Ok(Self(gate))
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.exit_exclusive() {
            warn!(error = %e, "leaving exclusive mode failed");
        }
    }
}

/// Holds the writer permit until dropped.
struct WriterPermit<'a>(&'a WriterGate);

impl<'a> WriterPermit<'a> {
    fn acquire(gate: &'a WriterGate) -> Self {
        gate.acquire(WriterHolder::Maintenance, true);
        Self(gate)
    }
}

impl Drop for WriterPermit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.release(WriterHolder::Maintenance) {
            warn!(error = %e, "releasing writer permit failed");
        }
    }
}

impl CoordinatorCore {
    fn components(&self) -> Vec<Arc<dyn TransactionalComponent>> {
        self.components.read().clone()
    }

    fn notify(&self, event: impl Fn(&dyn TransactionListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }

    fn current_generation(&self) -> Generation {
        self.registry.lock().generations.current()
    }

    fn check_running(&self) -> TxnResult<()> {
        match *self.lifecycle.lock() {
            Lifecycle::Created => return Err(TxnError::NotStarted),
            Lifecycle::ShutDown => return Err(TxnError::ShutDown),
            Lifecycle::Started => {}
        }
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(TxnError::RecoveryRequired);
        }
        Ok(())
    }

    fn notify_released(&self, released: Option<Generation>) {
        let Some(generation) = released else {
            return;
        };
        debug!(%generation, "generation released");
        for component in self.components() {
            component.generation_released(generation);
        }
    }

    fn release_writer(&self, record: &mut TxnRecord) {
        if record.holds_writer {
            record.holds_writer = false;
            if let Err(e) = self.writers.release(WriterHolder::Transaction) {
                warn!(txn_id = %record.id, error = %e, "writer permit already released");
            }
        }
    }

    // === Recovery ===

    fn recover(&self, components: &[Arc<dyn TransactionalComponent>]) -> TxnResult<()> {
        if self.journal.is_empty()? {
            debug!("journal empty; clean start");
            for component in components {
                component.clean_start()?;
            }
            return Ok(());
        }

        info!(journal_bytes = self.journal.size()?, "recovery started");
        let by_id: HashMap<ComponentId, &Arc<dyn TransactionalComponent>> =
            components.iter().map(|c| (c.component_id(), c)).collect();

        for component in components {
            component.start_recovery()?;
        }

        let mut replay = JournalReplay::new();
        {
            let mut records = self.journal.iter()?;
            for item in records.by_ref() {
                let (offset, record) = item?;
                if let Some(group) = replay.feed(offset, record) {
                    Self::apply_group(&by_id, &group)?;
                }
            }
            if let Some(group) = replay.finish() {
                Self::apply_group(&by_id, &group)?;
            }
            if records.truncated_tail() {
                warn!(offset = records.position(), "journal ends in a truncated record");
            }
        }

        for component in components {
            component.finish_recovery()?;
        }

        if let Some(generation) = replay.highest_generation() {
            self.registry.lock().generations.set_current(generation);
        }

        if self.config.read().reset_journal_after_commit {
            self.journal.reset()?;
        } else if replay.committed_end() < self.journal.size()? {
            self.journal.truncate(replay.committed_end())?;
        }

        self.stats.record_recovered(replay.committed_groups());
        info!(
            groups = replay.committed_groups(),
            discarded = replay.discarded_groups(),
            generation = ?replay.highest_generation(),
            "recovery finished"
        );
        Ok(())
    }

    fn apply_group(
        by_id: &HashMap<ComponentId, &Arc<dyn TransactionalComponent>>,
        group: &CommitGroup,
    ) -> TxnResult<()> {
        // Refuse the whole group before touching anything.
        if let Some((unknown, _)) = group.entries.iter().find(|(id, _)| !by_id.contains_key(id)) {
            error!(txn_id = %group.txn_id, component = %unknown, "journal entry for unregistered component");
            return Err(TxnError::UnknownComponent(*unknown));
        }
        for (id, payload) in &group.entries {
            if let Some(component) = by_id.get(id) {
                component.recover(payload)?;
            }
        }
        debug!(txn_id = %group.txn_id, generation = %group.generation, entries = group.entries.len(), "commit group replayed");
        Ok(())
    }

    // === Transactions ===

    fn begin(
        core: &Arc<Self>,
        txn_type: TxnType,
        can_block: bool,
    ) -> TxnResult<Option<Transaction>> {
        core.check_running()?;

        let Some(admitted_on) = core.exclusivity.enter_shared(can_block) else {
            core.stats.record_refusal();
            debug!(%txn_type, "begin refused: exclusive mode");
            return Ok(None);
        };

        let holds_writer = txn_type == TxnType::Write;
        if holds_writer && !core.writers.acquire(WriterHolder::Transaction, can_block) {
            core.exit_shared(admitted_on);
            core.stats.record_refusal();
            debug!(%txn_type, "begin refused: writer active or writers disabled");
            return Ok(None);
        }

        // A blocking wait may have outlived a shutdown or a fatal commit.
        if let Err(e) = core.check_running() {
            if holds_writer {
                if let Err(release) = core.writers.release(WriterHolder::Transaction) {
                    warn!(error = %release, "writer permit already released");
                }
            }
            core.exit_shared(admitted_on);
            return Err(e);
        }

        let id = TxnId::new(core.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mode = txn_type.initial_mode();
        let generation = {
            let mut registry = core.registry.lock();
            let generation = registry.generations.acquire();
            registry.active.insert(id, mode);
            registry.count_mode(mode, 1);
            generation
        };
        core.stats.record_begin(txn_type.is_write_capable());

        let record = TxnRecord {
            id,
            txn_type,
            mode,
            state: TxnState::Active,
            generation,
            holds_writer,
            admitted_on,
        };
        let mut txn = Transaction::new(Arc::clone(core), record);
        let ctx = txn.context();

        let components = core.components();
        for (begun, component) in components.iter().enumerate() {
            if let Err(e) = component.begin(&ctx) {
                warn!(txn_id = %id, component = %component.component_id(), error = %e, "component refused begin");
                let record = txn.record_mut();
                core.rollback(record, &components[..begun]);
                core.finish(record);
                return Err(e);
            }
        }

        debug!(txn_id = %id, %txn_type, %generation, "transaction started");
        core.notify(|l| l.on_begin(&ctx));
        Ok(Some(txn))
    }

    fn exit_shared(&self, admitted_on: ThreadId) {
        if let Err(e) = self.exclusivity.exit_shared(admitted_on) {
            warn!(error = %e, "exclusivity gate out of balance");
        }
    }

    pub(crate) fn promote(&self, record: &mut TxnRecord) -> TxnResult<bool> {
        if record.state != TxnState::Active {
            return Err(TxnError::lifecycle(format!(
                "cannot promote {} in state {}",
                record.id, record.state
            )));
        }
        if record.mode == ReadWrite::Write {
            return Ok(true);
        }
        if record.txn_type == TxnType::Read {
            return Err(TxnError::PromotionNotAllowed {
                txn_type: record.txn_type,
            });
        }

        let start_ctx = record.context();
        self.notify(|l| l.on_promote_start(&start_ctx));

        let wait = self.config.read().promotion_waits_for_writers;
        let promoted = self.try_promote(record, wait);
        self.stats.record_promotion(promoted);
        debug!(txn_id = %record.id, promoted, generation = %record.generation, "promotion");

        let ctx = record.context();
        self.notify(|l| l.on_promote_finish(&ctx, promoted));

        if promoted {
            for component in self.components() {
                component.promote(&ctx)?;
            }
        }
        Ok(promoted)
    }

    fn try_promote(&self, record: &mut TxnRecord, wait: bool) -> bool {
        let strict = record.txn_type == TxnType::ReadPromote;

        // Cheap check before possibly waiting for the writer permit.
        if strict && self.current_generation() != record.generation {
            return false;
        }
        if !self.writers.acquire(WriterHolder::Transaction, wait) {
            return false;
        }

        let mut registry = self.registry.lock();
        let current = registry.generations.current();
        let mut released = None;
        if current != record.generation {
            if strict {
                // A writer committed while this transaction waited.
                drop(registry);
                if let Err(e) = self.writers.release(WriterHolder::Transaction) {
                    warn!(error = %e, "writer permit already released");
                }
                return false;
            }
            let (now, superseded) = registry.generations.repin(record.generation);
            record.generation = now;
            released = superseded;
        }
        registry.count_mode(ReadWrite::Read, -1);
        registry.count_mode(ReadWrite::Write, 1);
        registry.active.insert(record.id, ReadWrite::Write);
        drop(registry);

        record.mode = ReadWrite::Write;
        record.holds_writer = true;
        self.notify_released(released);
        true
    }

    pub(crate) fn commit(&self, record: &mut TxnRecord) -> TxnResult<()> {
        if record.state != TxnState::Active {
            return Err(TxnError::lifecycle(format!(
                "cannot commit {} in state {}",
                record.id, record.state
            )));
        }
        match record.mode {
            ReadWrite::Read => self.commit_read(record),
            ReadWrite::Write => self.commit_write(record),
        }
    }

    fn commit_read(&self, record: &mut TxnRecord) -> TxnResult<()> {
        let ctx = record.context();
        self.notify(|l| l.on_commit_start(&ctx));
        let mut first_error = None;
        for component in self.components() {
            if let Err(e) = component.complete(&ctx) {
                warn!(txn_id = %record.id, component = %component.component_id(), error = %e, "complete failed");
                first_error.get_or_insert(e);
            }
        }
        record.state = TxnState::Committed;
        self.stats.record_commit();
        debug!(txn_id = %record.id, "read transaction committed");
        self.notify(|l| l.on_commit_finish(&ctx));
        first_error.map_or(Ok(()), Err)
    }

    fn commit_write(&self, record: &mut TxnRecord) -> TxnResult<()> {
        let ctx = record.context();
        let components = self.components();

        // Phase one.
        record.state = TxnState::Preparing;
        self.notify(|l| l.on_prepare_start(&ctx));
        let mut redo = Vec::with_capacity(components.len());
        for component in &components {
            match component.prepare_commit(&ctx) {
                Ok(Some(bytes)) => redo.push((component.component_id(), bytes)),
                Ok(None) => {}
                Err(e) => {
                    let failed = component.component_id();
                    warn!(txn_id = %record.id, component = %failed, error = %e, "prepare failed; aborting");
                    self.rollback(record, &components);
                    return Err(TxnError::CommitFailed {
                        component: failed,
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.notify(|l| l.on_prepare_finish(&ctx));

        // Commit point.
        let target = record.generation.next();
        let (sync, reset) = {
            let config = self.config.read();
            (config.sync_on_commit, config.reset_journal_after_commit)
        };
        if let Err(e) = self.write_group(record.id, target, &redo, sync) {
            warn!(txn_id = %record.id, error = %e, "journal write failed; aborting");
            let commit_written = self.journal.commit_marker_written();
            let abandoned = self.journal.abandon_group();
            self.rollback(record, &components);

            return Err(match abandoned {
                Err(abandon) if commit_written => {
                    self.poisoned.store(true, Ordering::SeqCst);
                    self.stats.record_fatal();
                    error!(
                        txn_id = %record.id,
                        generation = %target,
                        error = %abandon,
                        "commit marker could not be withdrawn; coordinator needs recovery"
                    );
                    TxnError::CommitInDoubt {
                        reason: format!("{e}; withdrawing the commit marker failed: {abandon}"),
                    }
                }
                Err(abandon) => {
                    warn!(txn_id = %record.id, error = %abandon, "journal tail will be cut before the next group");
                    TxnError::JournalWriteFailed {
                        reason: e.to_string(),
                    }
                }
                Ok(()) => TxnError::JournalWriteFailed {
                    reason: e.to_string(),
                },
            });
        }

        // Phase two: every component is tried even after a failure.
        self.notify(|l| l.on_commit_start(&ctx));
        let mut failures = Vec::new();
        for component in &components {
            if let Err(e) = component.commit(&ctx) {
                let failed = component.component_id();
                error!(
                    txn_id = %record.id,
                    component = %failed,
                    generation = %target,
                    error = %e,
                    "component failed after the journal recorded the commit"
                );
                failures.push((failed, e.to_string()));
            }
        }

        let (generation, released) = self.registry.lock().generations.advance();
        self.notify_released(released);

        if failures.is_empty() && reset {
            if let Err(e) = self.journal.reset() {
                warn!(txn_id = %record.id, error = %e, "journal reset after commit failed");
            }
        }

        for component in &components {
            if let Err(e) = component.complete(&ctx) {
                warn!(txn_id = %record.id, component = %component.component_id(), error = %e, "complete failed");
            }
        }
        record.state = TxnState::Committed;
        self.release_writer(record);

        if !failures.is_empty() {
            self.poisoned.store(true, Ordering::SeqCst);
            self.stats.record_fatal();
            error!(
                %generation,
                failed = failures.len(),
                "coordinator needs recovery; the journal will be replayed on restart"
            );
            return Err(TxnError::CommitFatal {
                generation,
                failures,
            });
        }

        self.stats.record_commit();
        debug!(txn_id = %record.id, %generation, entries = redo.len(), "transaction committed");
        self.notify(|l| l.on_commit_finish(&ctx));
        Ok(())
    }

    fn write_group(
        &self,
        txn_id: TxnId,
        generation: Generation,
        redo: &[(ComponentId, Vec<u8>)],
        sync: bool,
    ) -> TxnResult<()> {
        self.journal.start_group(txn_id, generation)?;
        for (component, payload) in redo {
            self.journal.write_redo(*component, payload)?;
        }
        self.journal.commit_group(txn_id, generation, sync)
    }

    /// Aborts on `components` (in reverse order), completes them and
    /// releases the writer permit.
    fn rollback(&self, record: &mut TxnRecord, components: &[Arc<dyn TransactionalComponent>]) {
        let ctx = record.context();
        self.notify(|l| l.on_abort_start(&ctx));
        for component in components.iter().rev() {
            if let Err(e) = component.abort(&ctx) {
                warn!(txn_id = %record.id, component = %component.component_id(), error = %e, "abort failed");
            }
        }
        for component in components {
            if let Err(e) = component.complete(&ctx) {
                warn!(txn_id = %record.id, component = %component.component_id(), error = %e, "complete failed");
            }
        }
        record.state = TxnState::Aborted;
        self.release_writer(record);
        self.stats.record_abort();
        debug!(txn_id = %record.id, "transaction aborted");
        self.notify(|l| l.on_abort_finish(&ctx));
    }

    pub(crate) fn abort(&self, record: &mut TxnRecord) -> TxnResult<()> {
        match record.state {
            TxnState::Active | TxnState::Preparing => {
                let components = self.components();
                self.rollback(record, &components);
                Ok(())
            }
            state => Err(TxnError::lifecycle(format!(
                "cannot abort {} in state {state}",
                record.id
            ))),
        }
    }

    pub(crate) fn end(&self, record: &mut TxnRecord) -> TxnResult<()> {
        match record.state {
            TxnState::Ended => return Ok(()),
            TxnState::Active if record.mode == ReadWrite::Write => {
                let components = self.components();
                self.rollback(record, &components);
                self.finish(record);
                return Err(TxnError::lifecycle(format!(
                    "write transaction {} ended without commit or abort; it was aborted",
                    record.id
                )));
            }
            TxnState::Active | TxnState::Inactive => {
                let ctx = record.context();
                for component in self.components() {
                    if let Err(e) = component.complete(&ctx) {
                        warn!(txn_id = %record.id, component = %component.component_id(), error = %e, "complete failed");
                    }
                }
            }
            // Commit leaves Preparing before it returns.
            TxnState::Preparing | TxnState::Committed | TxnState::Aborted => {}
        }
        self.finish(record);
        Ok(())
    }

    pub(crate) fn end_on_drop(&self, record: &mut TxnRecord) {
        if record.mode == ReadWrite::Write && record.state == TxnState::Active {
            warn!(txn_id = %record.id, "write transaction dropped while active; aborting");
            let components = self.components();
            self.rollback(record, &components);
        }
        if let Err(e) = self.end(record) {
            warn!(txn_id = %record.id, error = %e, "ending dropped transaction failed");
        }
    }

    /// Unregisters the transaction and drops its pins.
    fn finish(&self, record: &mut TxnRecord) {
        self.release_writer(record);
        let released = {
            let mut registry = self.registry.lock();
            if registry.active.remove(&record.id).is_some() {
                registry.count_mode(record.mode, -1);
            }
            registry.generations.release(record.generation)
        };
        self.stats.record_finish();
        self.exit_shared(record.admitted_on);

        let ctx = record.context();
        record.state = TxnState::Ended;
        debug!(txn_id = %record.id, "transaction ended");
        self.notify_released(released);
        self.notify(|l| l.on_end(&ctx));
    }
}
