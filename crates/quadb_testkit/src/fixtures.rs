//! Test fixtures.
//!
//! [`TestStore`] is a started coordinator with one [`CellComponent`]
//! registered, over either an in-memory journal or a temporary store
//! directory. [`TestStore::restart`] simulates a process restart: the
//! coordinator and the cell are dropped and fresh ones recover from the
//! same journal bytes.

use crate::components::CellComponent;
use quadb_core::{
    ComponentId, ComponentIdRegistry, CoordinatorConfig, TransactionCoordinator,
    TransactionalComponent, TxnType,
};
use quadb_storage::InMemoryBackend;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Base identity used for every fixture component.
pub const FIXTURE_BASE: Uuid = Uuid::from_u128(0x7175_6164_622d_7465_7374_6b69_7400_0001);

/// Name of the fixture cell in the id registry.
pub const CELL_NAME: &str = "cell";

/// Creates the id registry fixtures allocate from.
pub fn fixture_registry() -> ComponentIdRegistry {
    let registry = ComponentIdRegistry::new(FIXTURE_BASE);
    registry.register_name(1, CELL_NAME);
    registry.register_name(2, "faulty");
    registry
}

/// The id of the fixture cell.
pub fn cell_id() -> ComponentId {
    fixture_registry().alloc(CELL_NAME, 0)
}

/// A non-fixture id derived from the fixture base.
pub fn component_id(name: &str) -> ComponentId {
    fixture_registry().alloc(name, 0)
}

enum Journal {
    Memory(InMemoryBackend),
    Dir(TempDir),
}

/// A started coordinator with a cell component.
pub struct TestStore {
    /// The coordinator.
    pub coordinator: TransactionCoordinator,
    /// The registered cell.
    pub cell: Arc<CellComponent>,
    config: CoordinatorConfig,
    journal: Journal,
}

impl TestStore {
    /// An in-memory store whose cell starts at `initial`.
    pub fn memory(initial: i64) -> Self {
        Self::memory_with(CoordinatorConfig::default(), initial)
    }

    /// An in-memory store with `config`.
    pub fn memory_with(config: CoordinatorConfig, initial: i64) -> Self {
        let backend = InMemoryBackend::new();
        let shared = backend.share();
        let coordinator = TransactionCoordinator::with_backend(Box::new(backend), config.clone());
        Self::start(coordinator, config, Journal::Memory(shared), initial)
    }

    /// A store in a temporary directory.
    pub fn file(initial: i64) -> Self {
        Self::file_with(CoordinatorConfig::default(), initial)
    }

    /// A store in a temporary directory with `config`.
    pub fn file_with(config: CoordinatorConfig, initial: i64) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let coordinator = TransactionCoordinator::open(temp_dir.path(), config.clone())
            .expect("Failed to open store directory");
        Self::start(coordinator, config, Journal::Dir(temp_dir), initial)
    }

    fn start(
        coordinator: TransactionCoordinator,
        config: CoordinatorConfig,
        journal: Journal,
        initial: i64,
    ) -> Self {
        let cell = CellComponent::new(cell_id(), initial);
        coordinator
            .add(cell.clone())
            .expect("Failed to register cell");
        coordinator.start().expect("Failed to start coordinator");
        Self {
            coordinator,
            cell,
            config,
            journal,
        }
    }

    /// Handle on the in-memory journal bytes, if this store has one.
    pub fn journal_bytes(&self) -> Option<&InMemoryBackend> {
        match &self.journal {
            Journal::Memory(backend) => Some(backend),
            Journal::Dir(_) => None,
        }
    }

    /// The store directory, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.journal {
            Journal::Memory(_) => None,
            Journal::Dir(dir) => Some(dir.path()),
        }
    }

    /// Drops the coordinator and recovers a new one from the same journal.
    ///
    /// The new cell starts at 0, so any value it holds came from recovery.
    /// `extra` components are registered alongside it.
    pub fn restart_with(self, extra: Vec<Arc<dyn TransactionalComponent>>) -> Self {
        let Self {
            coordinator,
            cell,
            config,
            journal,
        } = self;
        drop(cell);
        drop(coordinator);

        let coordinator = match &journal {
            Journal::Memory(bytes) => {
                TransactionCoordinator::with_backend(Box::new(bytes.share()), config.clone())
            }
            Journal::Dir(dir) => TransactionCoordinator::open(dir.path(), config.clone())
                .expect("Failed to reopen store directory"),
        };
        for component in extra {
            coordinator
                .add(component)
                .expect("Failed to register component");
        }
        Self::start(coordinator, config, journal, 0)
    }

    /// [`restart_with`](Self::restart_with) without extra components.
    pub fn restart(self) -> Self {
        self.restart_with(Vec::new())
    }

    /// Commits `value` into the cell in its own WRITE transaction.
    pub fn write(&self, value: i64) {
        let mut txn = self
            .coordinator
            .begin(TxnType::Write)
            .expect("Failed to begin write");
        self.cell.set(&txn, value).expect("Failed to stage write");
        txn.commit().expect("Failed to commit");
        txn.end().expect("Failed to end");
    }

    /// Reads the cell in its own READ transaction.
    pub fn read(&self) -> i64 {
        let mut txn = self
            .coordinator
            .begin(TxnType::Read)
            .expect("Failed to begin read");
        let value = self.cell.get(&txn);
        txn.end().expect("Failed to end");
        value
    }
}

impl std::ops::Deref for TestStore {
    type Target = TransactionCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs `f` against a fresh in-memory store.
pub fn with_store<F, R>(initial: i64, f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory(initial);
    f(&store)
}
