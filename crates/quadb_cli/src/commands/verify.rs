//! Verify command implementation.

use super::{open_journal, CliResult};
use quadb_core::journal::JournalIterator;
use quadb_core::{CommitGroup, Generation, JournalReplay};
use quadb_storage::StorageBackend;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records read.
    pub records_checked: u64,
    /// Commit groups that reached their commit marker.
    pub committed_groups: u64,
    /// Groups without a commit marker.
    pub discarded_groups: u64,
    /// The journal ends in a partially written record.
    pub truncated_tail: bool,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying journal at {}", path.display());
    println!();

    let backend = open_journal(path)?;
    let result = verify_journal(&backend)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

/// Reads every record and checks the committed groups.
///
/// Committed generations must strictly increase in journal order. A torn
/// tail is reported but is not an error: recovery discards it.
pub fn verify_journal(backend: &dyn StorageBackend) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let mut replay = JournalReplay::new();
    let mut last: Option<Generation> = None;

    let mut next_offset = 0;
    let mut records = JournalIterator::new(backend, 0)?;
    for item in records.by_ref() {
        let (offset, record) = match item {
            Ok(entry) => entry,
            Err(e) => {
                result
                    .errors
                    .push(format!("Unreadable record at offset {next_offset}: {e}"));
                break;
            }
        };
        next_offset = offset + record.encoded_len() as u64;

        if let Some(group) = replay.feed(offset, record) {
            check_order(&mut result, &mut last, &group);
        }
    }
    if let Some(group) = replay.finish() {
        check_order(&mut result, &mut last, &group);
    }

    result.records_checked = replay.record_count();
    result.committed_groups = replay.committed_groups();
    result.discarded_groups = replay.discarded_groups();
    result.truncated_tail = records.truncated_tail();
    Ok(result)
}

/// Committed generations must strictly increase.
fn check_order(result: &mut VerifyResult, last: &mut Option<Generation>, group: &CommitGroup) {
    if let Some(previous) = *last {
        if group.generation <= previous {
            result.errors.push(format!(
                "Group of {} commits {} after {previous}",
                group.txn_id, group.generation
            ));
        }
    }
    *last = Some(group.generation);
}

fn print_result(result: &VerifyResult) {
    println!("  Records checked:  {}", result.records_checked);
    println!("  Committed groups: {}", result.committed_groups);
    println!("  Discarded groups: {}", result.discarded_groups);
    if result.truncated_tail {
        println!("  Torn tail record (discarded on recovery)");
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadb_core::{Journal, TxnId};
    use quadb_storage::InMemoryBackend;

    fn committed(generations: &[u64]) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let bytes = backend.share();
        let journal = Journal::new(Box::new(backend));
        for (n, generation) in generations.iter().enumerate() {
            let txn = TxnId::new(n as u64 + 1);
            journal.start_group(txn, Generation::new(*generation)).unwrap();
            journal.commit_group(txn, Generation::new(*generation), false).unwrap();
        }
        bytes
    }

    #[test]
    fn clean_journal_passes() {
        let result = verify_journal(&committed(&[1, 2, 3])).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.records_checked, 6);
        assert_eq!(result.committed_groups, 3);
    }

    #[test]
    fn torn_tail_is_not_an_error() {
        let bytes = committed(&[1, 2]);
        let mut data = bytes.data();
        data.truncate(data.len() - 5);
        bytes.replace(data);

        let result = verify_journal(&bytes).unwrap();
        assert!(result.is_ok());
        assert!(result.truncated_tail);
        assert_eq!(result.committed_groups, 1);
        assert_eq!(result.discarded_groups, 1);
    }

    #[test]
    fn generation_going_backwards_fails() {
        let result = verify_journal(&committed(&[2, 1])).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn corruption_fails() {
        let bytes = committed(&[1]);
        let mut data = bytes.data();
        data[0] = b'X';
        bytes.replace(data);

        let result = verify_journal(&bytes).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.records_checked, 0);
    }
}
