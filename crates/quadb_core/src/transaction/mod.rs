//! Transactions and their coordination.
//!
//! - [`TransactionCoordinator`] admits transactions, runs the two-phase
//!   commit across registered components and recovers from the journal
//! - [`Transaction`] is the handle a caller passes to component APIs
//! - [`ExclusivityGate`] and [`WriterGate`] are the two admission gates
//! - [`TransactionalBase`] wraps begin/commit/abort/end around a closure
//!
//! Isolation is by generation: a transaction reads the generation current
//! when it began until it ends, whatever commits in the meantime.

mod base;
mod coordinator;
mod gate;
mod generation;
mod listener;
mod state;

pub use base::TransactionalBase;
pub use coordinator::TransactionCoordinator;
pub use gate::{ExclusivityGate, WriterGate, WriterHolder};
pub use listener::TransactionListener;
pub use state::Transaction;
