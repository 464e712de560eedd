//! Property-based test generators using proptest.
//!
//! A [`Step`] script drives one coordinator from a single thread through
//! random interleavings of begin, write, promote, commit, abort and end on
//! up to a handful of open transactions. [`run_script`] applies a script
//! and then ends whatever is still open, so quiescence can be checked after
//! any script.

use crate::components::CellComponent;
use proptest::prelude::*;
use quadb_core::{Transaction, TransactionCoordinator, TxnType};

/// Most transactions a script keeps open at once.
pub const MAX_OPEN: usize = 4;

/// One action in a script. Slots index the open transactions modulo their
/// count; a step on an empty slot list is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Non-blocking begin.
    Begin(TxnType),
    /// Stage `value` in the cell if the transaction may write.
    Write(usize, i64),
    /// Try to promote.
    Promote(usize),
    /// Commit.
    Commit(usize),
    /// Abort.
    Abort(usize),
    /// End and forget the transaction.
    End(usize),
}

/// Strategy for transaction types.
pub fn txn_type_strategy() -> impl Strategy<Value = TxnType> {
    prop_oneof![
        Just(TxnType::Read),
        Just(TxnType::Write),
        Just(TxnType::ReadPromote),
        Just(TxnType::ReadCommittedPromote),
    ]
}

/// Strategy for single steps.
pub fn step_strategy() -> impl Strategy<Value = Step> {
    let slot = 0..MAX_OPEN;
    prop_oneof![
        3 => txn_type_strategy().prop_map(Step::Begin),
        2 => (slot.clone(), -100i64..100).prop_map(|(s, v)| Step::Write(s, v)),
        1 => slot.clone().prop_map(Step::Promote),
        2 => slot.clone().prop_map(Step::Commit),
        1 => slot.clone().prop_map(Step::Abort),
        2 => slot.prop_map(Step::End),
    ]
}

/// Strategy for scripts of up to `max_len` steps.
pub fn script_strategy(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step_strategy(), 0..max_len)
}

/// Outcome counters of a script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Begins admitted.
    pub admitted: usize,
    /// Begins refused.
    pub refused: usize,
    /// Successful commits of transactions holding write access.
    pub write_commits: usize,
    /// Value the cell must hold after the run.
    pub expected_value: i64,
}

/// Applies `steps`, then ends every transaction still open.
///
/// Lifecycle errors from out-of-order steps are expected and ignored; the
/// caller checks coordinator state afterwards.
pub fn run_script(
    coordinator: &TransactionCoordinator,
    cell: &CellComponent,
    steps: &[Step],
) -> ScriptOutcome {
    let mut open: Vec<Transaction> = Vec::new();
    let mut outcome = ScriptOutcome {
        expected_value: cell.committed(),
        ..ScriptOutcome::default()
    };
    let pick = |open: &Vec<Transaction>, slot: usize| {
        if open.is_empty() {
            None
        } else {
            Some(slot % open.len())
        }
    };

    for step in steps {
        match *step {
            Step::Begin(txn_type) => {
                if open.len() >= MAX_OPEN {
                    continue;
                }
                match coordinator.try_begin(txn_type) {
                    Ok(Some(txn)) => {
                        outcome.admitted += 1;
                        open.push(txn);
                    }
                    Ok(None) => outcome.refused += 1,
                    Err(_) => {}
                }
            }
            Step::Write(slot, value) => {
                if let Some(i) = pick(&open, slot) {
                    let _ = cell.set(&open[i], value);
                }
            }
            Step::Promote(slot) => {
                if let Some(i) = pick(&open, slot) {
                    // A blocking promotion would wait on our own writer.
                    if coordinator.count_active_writers() == 0 {
                        let _ = open[i].promote();
                    }
                }
            }
            Step::Commit(slot) => {
                if let Some(i) = pick(&open, slot) {
                    let was_write = open[i].is_write();
                    let staged = cell.get(&open[i]);
                    if open[i].commit().is_ok() && was_write {
                        outcome.write_commits += 1;
                        outcome.expected_value = staged;
                    }
                }
            }
            Step::Abort(slot) => {
                if let Some(i) = pick(&open, slot) {
                    let _ = open[i].abort();
                }
            }
            Step::End(slot) => {
                if let Some(i) = pick(&open, slot) {
                    let mut txn = open.swap_remove(i);
                    let _ = txn.end();
                }
            }
        }
    }

    for mut txn in open {
        let _ = txn.end();
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    #[test]
    fn scripted_commit_is_counted() {
        let store = TestStore::memory(1);
        let outcome = run_script(
            &store.coordinator,
            &store.cell,
            &[
                Step::Begin(TxnType::Write),
                Step::Write(0, 9),
                Step::Commit(0),
                Step::End(0),
            ],
        );
        assert_eq!(outcome.admitted, 1);
        assert_eq!(outcome.write_commits, 1);
        assert_eq!(outcome.expected_value, 9);
        assert_eq!(store.cell.committed(), 9);
    }
}
