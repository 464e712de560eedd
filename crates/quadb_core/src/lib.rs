//! # quadb core
//!
//! Transaction coordination for the quadb RDF store.
//!
//! This crate provides:
//! - A commit journal with checksummed records and crash recovery
//! - Component identities and a per-store id registry
//! - The [`TransactionalComponent`] contract storage units implement
//! - [`TransactionCoordinator`]: admission control, two-phase commit,
//!   generation tracking and recovery
//! - [`TransactionalBase`] for closure-scoped transactions
//!
//! ## Example
//!
//! ```rust
//! use quadb_core::{TransactionCoordinator, TxnType};
//!
//! let coordinator = TransactionCoordinator::in_memory();
//! coordinator.start()?;
//!
//! let mut txn = coordinator.begin(TxnType::Write)?;
//! txn.commit()?;
//! txn.end()?;
//!
//! assert_eq!(coordinator.current_generation().as_u64(), 1);
//! assert_eq!(coordinator.count_active(), 0);
//! # Ok::<(), quadb_core::TxnError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod component;
mod config;
#[cfg(feature = "std")]
mod dir;
mod error;
pub mod journal;
mod stats;
mod transaction;
mod types;

pub use component::{ComponentId, ComponentIdRegistry, TransactionalComponent, COMPONENT_ID_LEN};
pub use config::CoordinatorConfig;
#[cfg(feature = "std")]
pub use dir::StoreDir;
pub use error::{TxnError, TxnResult};
pub use journal::{CommitGroup, Journal, JournalRecord, JournalRecordType, JournalReplay};
pub use stats::{CoordinatorStats, CoordinatorStatsSnapshot};
pub use transaction::{
    ExclusivityGate, Transaction, TransactionCoordinator, TransactionListener, TransactionalBase,
    WriterGate, WriterHolder,
};
pub use types::{Generation, ReadWrite, TxnContext, TxnId, TxnState, TxnType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
