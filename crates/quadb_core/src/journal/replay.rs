//! Grouping a record stream into complete commit groups.

use crate::component::ComponentId;
use crate::error::TxnResult;
use crate::journal::record::JournalRecord;
use crate::types::{Generation, TxnId};
use tracing::debug;

/// One durably committed commit group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitGroup {
    /// Transaction that wrote the group.
    pub txn_id: TxnId,
    /// Generation the group produced.
    pub generation: Generation,
    /// Redo entries in journal order.
    pub entries: Vec<(ComponentId, Vec<u8>)>,
}

#[derive(Debug)]
struct PendingGroup {
    txn_id: TxnId,
    generation: Generation,
    entries: Vec<(ComponentId, Vec<u8>)>,
}

/// Incremental commit-group reassembly.
///
/// Feed records in journal order. A `Commit` matching the open `Start`
/// completes a group, which is held back for one record: an `Abort` naming
/// the same transaction right after its commit marker cancels it. Any other
/// record, or [`finish`](Self::finish), releases the held group as a
/// [`CommitGroup`].
///
/// An `Abort`, a second `Start` or the end of the journal discards a group
/// that has no commit marker yet. Redo entries outside a group are ignored.
#[derive(Debug, Default)]
pub struct JournalReplay {
    pending: Option<PendingGroup>,
    /// Completed group and the offset just past its commit marker.
    held: Option<(CommitGroup, u64)>,
    record_count: u64,
    committed_groups: u64,
    discarded_groups: u64,
    highest_generation: Option<Generation>,
    committed_end: u64,
}

impl JournalReplay {
    /// Creates an empty replay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one record located at `offset`.
    ///
    /// Returns the previously completed group once it can no longer be
    /// cancelled.
    pub fn feed(&mut self, offset: u64, record: JournalRecord) -> Option<CommitGroup> {
        self.record_count += 1;
        let end = offset + record.encoded_len() as u64;

        if let JournalRecord::Abort { txn_id } = &record {
            if let Some((held, _)) = self.held.take_if(|(held, _)| held.txn_id == *txn_id) {
                debug!(txn_id = %held.txn_id, generation = %held.generation, "committed group cancelled by abort marker");
                self.discarded_groups += 1;
                self.committed_end = end;
                return None;
            }
        }
        let released = self.release();

        match record {
            JournalRecord::Start { txn_id, generation } => {
                if let Some(dropped) = self.pending.take() {
                    debug!(txn_id = %dropped.txn_id, "journal group superseded by a new start");
                    self.discarded_groups += 1;
                }
                self.pending = Some(PendingGroup {
                    txn_id,
                    generation,
                    entries: Vec::new(),
                });
            }

            JournalRecord::Redo { component, payload } => match self.pending.as_mut() {
                Some(group) => group.entries.push((component, payload)),
                None => debug!(offset, %component, "redo entry outside a group ignored"),
            },

            JournalRecord::Commit { txn_id, generation } => match self.pending.take() {
                Some(group) if group.txn_id == txn_id => {
                    let complete = CommitGroup {
                        txn_id,
                        generation,
                        entries: group.entries,
                    };
                    self.held = Some((complete, end));
                }
                Some(group) => {
                    debug!(open = %group.txn_id, commit = %txn_id, "mismatched commit marker");
                    self.discarded_groups += 1;
                }
                None => {}
            },

            JournalRecord::Abort { txn_id } => {
                if self.pending.take().is_some() {
                    debug!(%txn_id, "journal group aborted");
                    self.discarded_groups += 1;
                }
                // Nothing is open after an abort marker.
                self.committed_end = end;
            }
        }
        released
    }

    /// Counts the held group as committed and hands it out.
    fn release(&mut self) -> Option<CommitGroup> {
        let (group, end) = self.held.take()?;
        self.committed_groups += 1;
        self.committed_end = end;
        self.highest_generation = self.highest_generation.max(Some(group.generation));
        Some(group)
    }

    /// Ends the stream, returning the last completed group if one is held.
    ///
    /// A group still open counts as discarded.
    pub fn finish(&mut self) -> Option<CommitGroup> {
        if let Some(group) = self.pending.take() {
            debug!(txn_id = %group.txn_id, "incomplete journal group discarded");
            self.discarded_groups += 1;
        }
        self.release()
    }

    /// Records consumed so far.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Complete groups released so far.
    #[must_use]
    pub fn committed_groups(&self) -> u64 {
        self.committed_groups
    }

    /// Groups that were started but never committed, or were cancelled.
    #[must_use]
    pub fn discarded_groups(&self) -> u64 {
        self.discarded_groups
    }

    /// Highest generation among the released groups.
    #[must_use]
    pub fn highest_generation(&self) -> Option<Generation> {
        self.highest_generation
    }

    /// Offset just past the last record that belongs to the committed prefix.
    #[must_use]
    pub fn committed_end(&self) -> u64 {
        self.committed_end
    }

    /// Replays a whole record stream, collecting every complete group.
    pub fn collect<I>(records: I) -> TxnResult<(Self, Vec<CommitGroup>)>
    where
        I: IntoIterator<Item = TxnResult<(u64, JournalRecord)>>,
    {
        let mut replay = Self::new();
        let mut groups = Vec::new();
        for item in records {
            let (offset, record) = item?;
            groups.extend(replay.feed(offset, record));
        }
        groups.extend(replay.finish());
        Ok((replay, groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn component() -> ComponentId {
        ComponentId::new(Uuid::nil(), 1)
    }

    /// Lays records out back to back, the way the journal would.
    fn with_offsets(records: Vec<JournalRecord>) -> Vec<TxnResult<(u64, JournalRecord)>> {
        let mut offset = 0;
        records
            .into_iter()
            .map(|r| {
                let at = offset;
                offset += r.encoded_len() as u64;
                Ok((at, r))
            })
            .collect()
    }

    fn group(txn: u64, gen: u64, payload: &[u8]) -> Vec<JournalRecord> {
        vec![
            JournalRecord::Start {
                txn_id: TxnId::new(txn),
                generation: Generation::new(gen),
            },
            JournalRecord::Redo {
                component: component(),
                payload: payload.to_vec(),
            },
            JournalRecord::Commit {
                txn_id: TxnId::new(txn),
                generation: Generation::new(gen),
            },
        ]
    }

    #[test]
    fn complete_groups_are_yielded() {
        let mut records = group(1, 1, b"a");
        records.extend(group(2, 2, b"b"));
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].entries, vec![(component(), b"b".to_vec())]);
        assert_eq!(replay.highest_generation(), Some(Generation::new(2)));
        assert_eq!(replay.discarded_groups(), 0);
        assert_eq!(replay.record_count(), 6);
    }

    #[test]
    fn trailing_partial_group_discarded() {
        let mut records = group(1, 1, b"a");
        let committed: u64 = records.iter().map(|r| r.encoded_len() as u64).sum();
        records.extend(group(2, 2, b"b").into_iter().take(2));
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(replay.discarded_groups(), 1);
        assert_eq!(replay.committed_end(), committed);
        assert_eq!(replay.highest_generation(), Some(Generation::new(1)));
    }

    #[test]
    fn abort_discards_pending_group() {
        let mut records: Vec<_> = group(1, 1, b"a").into_iter().take(2).collect();
        records.push(JournalRecord::Abort { txn_id: TxnId::new(1) });
        records.extend(group(2, 1, b"c"));
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].txn_id, TxnId::new(2));
        assert_eq!(replay.discarded_groups(), 1);
    }

    #[test]
    fn restart_discards_pending_group() {
        let mut records: Vec<_> = group(1, 1, b"a").into_iter().take(2).collect();
        records.extend(group(2, 1, b"b"));
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries[0].1, b"b".to_vec());
        assert_eq!(replay.discarded_groups(), 1);
    }

    #[test]
    fn abort_after_commit_marker_cancels_group() {
        let mut records = group(1, 1, b"a");
        records.extend(group(2, 2, b"b"));
        records.push(JournalRecord::Abort { txn_id: TxnId::new(2) });
        let end: u64 = records.iter().map(|r| r.encoded_len() as u64).sum();
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].txn_id, TxnId::new(1));
        assert_eq!(replay.highest_generation(), Some(Generation::new(1)));
        assert_eq!(replay.committed_groups(), 1);
        assert_eq!(replay.discarded_groups(), 1);
        assert_eq!(replay.committed_end(), end);
    }

    #[test]
    fn abort_for_another_txn_keeps_group() {
        let mut records = group(1, 1, b"a");
        records.push(JournalRecord::Abort { txn_id: TxnId::new(9) });
        let (replay, groups) = JournalReplay::collect(with_offsets(records)).unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(replay.discarded_groups(), 0);
    }

    #[test]
    fn group_released_by_next_record() {
        let mut replay = JournalReplay::new();
        let mut offset = 0;
        let mut released = Vec::new();
        for record in group(1, 1, b"a").into_iter().chain(group(2, 2, b"b")) {
            let len = record.encoded_len() as u64;
            released.push(replay.feed(offset, record).map(|g| g.txn_id));
            offset += len;
        }
        // Group 1 comes out with the next START, group 2 only at the end.
        assert_eq!(released[3], Some(TxnId::new(1)));
        assert_eq!(released.iter().flatten().count(), 1);
        assert_eq!(replay.finish().map(|g| g.txn_id), Some(TxnId::new(2)));
        assert_eq!(replay.committed_groups(), 2);
    }

    #[test]
    fn empty_stream() {
        let (replay, groups) = JournalReplay::collect(Vec::new()).unwrap();
        assert!(groups.is_empty());
        assert_eq!(replay.highest_generation(), None);
        assert_eq!(replay.committed_end(), 0);
    }
}
