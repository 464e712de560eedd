//! Benchmark utilities.

use parking_lot::Mutex;
use quadb_core::{
    ComponentId, TransactionCoordinator, TransactionalComponent, TxnContext, TxnId, TxnResult,
};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A component that journals an opaque payload per write transaction.
#[derive(Debug)]
pub struct BlobComponent {
    id: ComponentId,
    staged: Mutex<HashMap<TxnId, Vec<u8>>>,
}

impl BlobComponent {
    /// Creates a component with index `index` under a fixed bench base.
    pub fn new(index: u32) -> Arc<Self> {
        Arc::new(Self {
            id: ComponentId::new(Uuid::from_u128(0xbe7c_0000_0000_0000_0000_0000_0000_0001), index),
            staged: Mutex::new(HashMap::new()),
        })
    }

    /// Stages `payload` as the redo entry of `txn`.
    pub fn stage(&self, txn: TxnId, payload: Vec<u8>) {
        self.staged.lock().insert(txn, payload);
    }
}

impl TransactionalComponent for BlobComponent {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn recover(&self, _payload: &[u8]) -> TxnResult<()> {
        Ok(())
    }

    fn prepare_commit(&self, ctx: &TxnContext) -> TxnResult<Option<Vec<u8>>> {
        Ok(self.staged.lock().get(&ctx.id).cloned())
    }

    fn commit(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.staged.lock().remove(&ctx.id);
        Ok(())
    }

    fn abort(&self, ctx: &TxnContext) -> TxnResult<()> {
        self.staged.lock().remove(&ctx.id);
        Ok(())
    }
}

/// Starts an in-memory coordinator with `components` blob components.
pub fn started_coordinator(components: u32) -> (TransactionCoordinator, Vec<Arc<BlobComponent>>) {
    let coordinator = TransactionCoordinator::in_memory();
    let blobs: Vec<_> = (1..=components).map(BlobComponent::new).collect();
    for blob in &blobs {
        coordinator
            .add(blob.clone())
            .expect("Failed to register component");
    }
    coordinator.start().expect("Failed to start coordinator");
    (coordinator, blobs)
}
