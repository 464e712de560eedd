//! Random transaction scripts always leave the coordinator quiescent.

use proptest::prelude::*;
use quadb_core::{Generation, TxnType};
use quadb_testkit::{run_script, script_strategy, TestStore};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scripts_end_quiescent(steps in script_strategy(40)) {
        let store = TestStore::memory(0);
        let outcome = run_script(&store.coordinator, &store.cell, &steps);

        prop_assert_eq!(store.count_active(), 0);
        prop_assert_eq!(store.count_active_readers(), 0);
        prop_assert_eq!(store.count_active_writers(), 0);
        prop_assert_eq!(store.count_begin(), store.count_finished());
        prop_assert_eq!(store.count_begin(), outcome.admitted as u64);
        prop_assert_eq!(store.oldest_active_generation(), None);

        prop_assert_eq!(store.cell.committed(), outcome.expected_value);
        prop_assert!(!store.cell.has_pending());
        prop_assert_eq!(
            store.current_generation(),
            Generation::new(outcome.write_commits as u64)
        );

        // Nothing is left holding the writer slot or the exclusivity gate.
        prop_assert!(store.try_begin(TxnType::Write).unwrap().is_some());
        prop_assert!(store.try_exclusive_mode(false).unwrap());
        store.finish_exclusive_mode().unwrap();
    }

    #[test]
    fn scripts_replay_to_same_state(steps in script_strategy(24)) {
        let store = TestStore::memory_with(
            quadb_core::CoordinatorConfig::default().reset_journal_after_commit(false),
            0,
        );
        let outcome = run_script(&store.coordinator, &store.cell, &steps);
        let before = store.current_generation();

        let store = store.restart();
        prop_assert_eq!(store.current_generation(), before);
        prop_assert_eq!(store.read(), outcome.expected_value);
    }
}
