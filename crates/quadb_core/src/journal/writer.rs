//! Journal writer and reader.

use crate::component::ComponentId;
use crate::error::{TxnError, TxnResult};
use crate::journal::iterator::JournalIterator;
use crate::journal::record::JournalRecord;
use crate::types::{Generation, TxnId};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use quadb_storage::StorageBackend;
use tracing::{debug, warn};

/// Streaming iterator over a journal held by a [`Journal`].
pub type JournalRecords<'a> = JournalIterator<MappedMutexGuard<'a, dyn StorageBackend>>;

#[derive(Debug, Clone, Copy)]
struct OpenGroup {
    offset: u64,
    txn_id: TxnId,
    /// End of the last record of the group that was written in full.
    clean_end: u64,
    commit_written: bool,
}

#[derive(Debug, Default)]
struct GroupState {
    open: Option<OpenGroup>,
    /// Offset the journal must be cut back to before the next group.
    repair_to: Option<u64>,
}

/// Append-only log of commit groups.
///
/// Only the coordinator writes it, and only while it holds the writer slot,
/// so at most one group is open at a time. A group is
/// `Start, Redo*, Commit`; it counts as committed once the `Commit` record
/// has been synced.
///
/// A group that fails part way is abandoned: the journal is cut back to the
/// group's start. When that truncation fails, an `Abort` marker cancels the
/// group instead, or, if the tail holds a partial record, the cut is retried
/// before the next group starts.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    state: Mutex<GroupState>,
}

impl Journal {
    /// Creates a journal over a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Appends one record, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn append(&self, record: &JournalRecord) -> TxnResult<u64> {
        let data = record.encode()?;
        let offset = self.backend.lock().append(&data)?;
        Ok(offset)
    }

    /// Opens a commit group for `txn_id` producing `generation`.
    ///
    /// The group is open as soon as this is called, even if writing the
    /// `Start` record fails; [`abandon_group`](Self::abandon_group) then
    /// removes whatever part of it landed.
    pub fn start_group(&self, txn_id: TxnId, generation: Generation) -> TxnResult<u64> {
        let mut state = self.state.lock();
        if let Some(open) = state.open {
            return Err(TxnError::lifecycle(format!(
                "journal group already open for {}",
                open.txn_id
            )));
        }
        let data = JournalRecord::Start { txn_id, generation }.encode()?;

        let mut backend = self.backend.lock();
        if let Some(repair_to) = state.repair_to {
            backend.truncate(repair_to)?;
            state.repair_to = None;
            debug!(offset = repair_to, "journal tail repaired");
        }
        let offset = backend.size()?;
        state.open = Some(OpenGroup {
            offset,
            txn_id,
            clean_end: offset,
            commit_written: false,
        });

        backend.append(&data)?;
        if let Some(open) = state.open.as_mut() {
            open.clean_end = offset + data.len() as u64;
        }
        debug!(%txn_id, %generation, offset, "journal group started");
        Ok(offset)
    }

    /// Writes one redo entry into the open group.
    pub fn write_redo(&self, component: ComponentId, payload: &[u8]) -> TxnResult<u64> {
        let mut state = self.state.lock();
        let Some(open) = state.open.as_mut() else {
            return Err(TxnError::lifecycle("redo entry written outside a journal group"));
        };
        let data = JournalRecord::Redo {
            component,
            payload: payload.to_vec(),
        }
        .encode()?;
        let offset = self.backend.lock().append(&data)?;
        open.clean_end = offset + data.len() as u64;
        Ok(offset)
    }

    /// Writes the commit marker and makes the group durable.
    ///
    /// With `sync` the backend is synced to stable storage; otherwise it is
    /// only flushed to the operating system. On failure the group stays open
    /// for [`abandon_group`](Self::abandon_group).
    pub fn commit_group(&self, txn_id: TxnId, generation: Generation, sync: bool) -> TxnResult<()> {
        let mut state = self.state.lock();
        let open = match state.open.as_mut() {
            Some(open) if open.txn_id == txn_id => open,
            Some(open) => {
                return Err(TxnError::lifecycle(format!(
                    "journal group belongs to {}, not {txn_id}",
                    open.txn_id
                )));
            }
            None => return Err(TxnError::lifecycle("no journal group open")),
        };

        let data = JournalRecord::Commit { txn_id, generation }.encode()?;
        {
            let mut backend = self.backend.lock();
            let offset = backend.append(&data)?;
            open.clean_end = offset + data.len() as u64;
            open.commit_written = true;
            if sync {
                backend.sync()?;
            } else {
                backend.flush()?;
            }
        }
        state.open = None;
        debug!(%txn_id, %generation, "journal group committed");
        Ok(())
    }

    /// Returns true if the open group's commit marker is already in the
    /// journal, i.e. a failed commit may still be replayed unless
    /// [`abandon_group`](Self::abandon_group) succeeds.
    #[must_use]
    pub fn commit_marker_written(&self) -> bool {
        self.state.lock().open.is_some_and(|open| open.commit_written)
    }

    /// Drops the open group.
    ///
    /// The journal is truncated back to the group's start. If truncation
    /// fails and the tail ends on a record boundary, a synced `Abort` marker
    /// cancels the group instead; replay honours it even after the group's
    /// commit marker.
    ///
    /// # Errors
    ///
    /// Returns the truncation error if neither worked. The group is still
    /// closed, and the cut is retried before the next group starts.
    pub fn abandon_group(&self) -> TxnResult<()> {
        let mut state = self.state.lock();
        let Some(group) = state.open.take() else {
            return Ok(());
        };
        let txn_id = group.txn_id;

        let mut backend = self.backend.lock();
        let truncate_error = match backend.truncate(group.offset) {
            Ok(()) => {
                debug!(%txn_id, offset = group.offset, "journal group truncated");
                return Ok(());
            }
            Err(e) => e,
        };
        warn!(%txn_id, error = %truncate_error, "journal truncation failed");

        let on_boundary = matches!(backend.size(), Ok(size) if size == group.clean_end);
        if on_boundary {
            match Self::write_abort(&mut **backend, txn_id) {
                Ok(()) => {
                    debug!(%txn_id, commit_written = group.commit_written, "journal group cancelled by abort marker");
                    return Ok(());
                }
                Err(e) => warn!(%txn_id, error = %e, "abort marker could not be made durable"),
            }
        }

        state.repair_to = Some(group.offset);
        Err(truncate_error.into())
    }

    fn write_abort(backend: &mut dyn StorageBackend, txn_id: TxnId) -> TxnResult<()> {
        let data = JournalRecord::Abort { txn_id }.encode()?;
        backend.append(&data)?;
        backend.sync()?;
        Ok(())
    }

    /// Returns true if a group is open.
    #[must_use]
    pub fn in_group(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Returns true if a failed group left bytes that will be cut before
    /// the next group.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        self.state.lock().repair_to.is_some()
    }

    /// Discards the whole journal.
    pub fn reset(&self) -> TxnResult<()> {
        self.truncate(0)
    }

    /// Discards everything after `offset`.
    pub fn truncate(&self, offset: u64) -> TxnResult<()> {
        let mut state = self.state.lock();
        self.backend.lock().truncate(offset)?;
        if state.repair_to.is_some_and(|repair_to| offset <= repair_to) {
            state.repair_to = None;
        }
        Ok(())
    }

    /// Syncs the journal to stable storage.
    pub fn sync(&self) -> TxnResult<()> {
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> TxnResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns true if the journal holds no bytes.
    pub fn is_empty(&self) -> TxnResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Returns a streaming iterator over all records.
    ///
    /// The journal stays locked while the iterator is alive.
    pub fn iter(&self) -> TxnResult<JournalRecords<'_>> {
        let guard = MutexGuard::map(self.backend.lock(), |b| &mut **b);
        JournalIterator::new(guard, 0)
    }

    /// Reads every record into memory.
    pub fn read_all(&self) -> TxnResult<Vec<(u64, JournalRecord)>> {
        self.iter()?.collect()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{CommitGroup, JournalReplay};
    use quadb_storage::{InMemoryBackend, StorageError, StorageResult};
    use std::sync::Arc;
    use uuid::Uuid;

    fn component(index: u32) -> ComponentId {
        ComponentId::new(Uuid::nil(), index)
    }

    fn create_journal() -> (Journal, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let observer = backend.share();
        (Journal::new(Box::new(backend)), observer)
    }

    #[test]
    fn full_group_sequence() {
        let (journal, _) = create_journal();
        let txn = TxnId::new(1);
        let gen = Generation::new(1);

        journal.start_group(txn, gen).unwrap();
        assert!(journal.in_group());
        journal.write_redo(component(1), b"spo").unwrap();
        journal.write_redo(component(2), b"nodes").unwrap();
        journal.commit_group(txn, gen, true).unwrap();
        assert!(!journal.in_group());

        let records: Vec<_> = journal.read_all().unwrap().into_iter().map(|(_, r)| r).collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], JournalRecord::Start { txn_id: txn, generation: gen });
        assert_eq!(
            records[2],
            JournalRecord::Redo {
                component: component(2),
                payload: b"nodes".to_vec()
            }
        );
        assert_eq!(records[3], JournalRecord::Commit { txn_id: txn, generation: gen });
    }

    #[test]
    fn redo_outside_group_rejected() {
        let (journal, _) = create_journal();
        assert!(matches!(
            journal.write_redo(component(1), b"x"),
            Err(TxnError::Lifecycle { .. })
        ));
    }

    #[test]
    fn nested_group_rejected() {
        let (journal, _) = create_journal();
        journal.start_group(TxnId::new(1), Generation::new(1)).unwrap();
        assert!(journal.start_group(TxnId::new(2), Generation::new(1)).is_err());
        assert!(journal.commit_group(TxnId::new(2), Generation::new(1), false).is_err());
    }

    #[test]
    fn abandon_truncates_to_group_start() {
        let (journal, observer) = create_journal();
        journal.start_group(TxnId::new(1), Generation::new(1)).unwrap();
        journal.commit_group(TxnId::new(1), Generation::new(1), false).unwrap();
        let committed = observer.data().len();

        journal.start_group(TxnId::new(2), Generation::new(2)).unwrap();
        journal.write_redo(component(1), b"lost").unwrap();
        journal.abandon_group().unwrap();

        assert_eq!(observer.data().len(), committed);
        assert!(!journal.in_group());
        // Nothing open: a second abandon is a no-op.
        journal.abandon_group().unwrap();
    }

    #[derive(Debug, Default)]
    struct Switches {
        /// Bytes of the next append that land before it fails.
        tear_next_append: Option<usize>,
        fail_truncate: bool,
        failing_syncs: usize,
    }

    /// In-memory backend with switchable failures.
    struct Flaky {
        inner: InMemoryBackend,
        switches: Arc<Mutex<Switches>>,
    }

    fn failure(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("{what} failed")))
    }

    impl StorageBackend for Flaky {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            if let Some(keep) = self.switches.lock().tear_next_append.take() {
                self.inner.append(&data[..keep])?;
                return Err(failure("append"));
            }
            self.inner.append(data)
        }
        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn sync(&mut self) -> StorageResult<()> {
            let mut switches = self.switches.lock();
            if switches.failing_syncs > 0 {
                switches.failing_syncs -= 1;
                return Err(failure("sync"));
            }
            self.inner.sync()
        }
        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            if self.switches.lock().fail_truncate {
                return Err(failure("truncate"));
            }
            self.inner.truncate(new_size)
        }
    }

    fn flaky_journal() -> (Journal, Arc<Mutex<Switches>>, InMemoryBackend) {
        let inner = InMemoryBackend::new();
        let observer = inner.share();
        let switches = Arc::new(Mutex::new(Switches::default()));
        let backend = Flaky {
            inner,
            switches: Arc::clone(&switches),
        };
        (Journal::new(Box::new(backend)), switches, observer)
    }

    fn committed_groups(journal: &Journal) -> Vec<CommitGroup> {
        let (_, groups) = JournalReplay::collect(journal.iter().unwrap()).unwrap();
        groups
    }

    #[test]
    fn abandon_falls_back_to_abort_marker() {
        let (journal, switches, _) = flaky_journal();
        switches.lock().fail_truncate = true;
        journal.start_group(TxnId::new(5), Generation::new(1)).unwrap();
        journal.write_redo(component(1), b"x").unwrap();
        journal.abandon_group().unwrap();
        assert!(!journal.needs_repair());

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].1, JournalRecord::Abort { txn_id: TxnId::new(5) });
    }

    #[test]
    fn torn_start_is_cut_before_next_group() {
        let (journal, switches, observer) = flaky_journal();
        {
            let mut s = switches.lock();
            s.tear_next_append = Some(5);
            s.fail_truncate = true;
        }
        assert!(journal.start_group(TxnId::new(1), Generation::new(1)).is_err());
        assert!(journal.in_group());
        assert!(!journal.commit_marker_written());
        // No abort marker after a partial record.
        assert!(journal.abandon_group().is_err());
        assert!(journal.needs_repair());
        assert_eq!(observer.data().len(), 5);

        switches.lock().fail_truncate = false;
        journal.start_group(TxnId::new(2), Generation::new(1)).unwrap();
        journal.write_redo(component(1), b"kept").unwrap();
        journal.commit_group(TxnId::new(2), Generation::new(1), true).unwrap();
        assert!(!journal.needs_repair());

        let records = journal.read_all().unwrap();
        assert_eq!(records[0].0, 0);
        assert_eq!(
            records[0].1,
            JournalRecord::Start { txn_id: TxnId::new(2), generation: Generation::new(1) }
        );
        assert_eq!(committed_groups(&journal).len(), 1);
    }

    #[test]
    fn abort_marker_cancels_written_commit() {
        let (journal, switches, _) = flaky_journal();
        {
            let mut s = switches.lock();
            s.failing_syncs = 1;
            s.fail_truncate = true;
        }
        journal.start_group(TxnId::new(1), Generation::new(1)).unwrap();
        journal.write_redo(component(1), b"gone").unwrap();
        assert!(journal.commit_group(TxnId::new(1), Generation::new(1), true).is_err());
        assert!(journal.commit_marker_written());

        journal.abandon_group().unwrap();
        assert!(!journal.in_group());
        let records = journal.read_all().unwrap();
        assert_eq!(records.last().unwrap().1, JournalRecord::Abort { txn_id: TxnId::new(1) });
        assert!(committed_groups(&journal).is_empty());
    }

    #[test]
    fn unwithdrawn_commit_is_cut_before_next_group() {
        let (journal, switches, observer) = flaky_journal();
        {
            let mut s = switches.lock();
            s.failing_syncs = 2;
            s.fail_truncate = true;
        }
        journal.start_group(TxnId::new(1), Generation::new(1)).unwrap();
        assert!(journal.commit_group(TxnId::new(1), Generation::new(1), true).is_err());
        assert!(journal.abandon_group().is_err());
        assert!(journal.needs_repair());

        switches.lock().fail_truncate = false;
        journal.start_group(TxnId::new(2), Generation::new(1)).unwrap();
        journal.commit_group(TxnId::new(2), Generation::new(1), false).unwrap();
        let groups = committed_groups(&journal);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].txn_id, TxnId::new(2));
        assert_eq!(journal.read_all().unwrap().len(), 2);
        assert_eq!(observer.data().len() as u64, journal.size().unwrap());
    }

    #[test]
    fn reset_empties_journal() {
        let (journal, _) = create_journal();
        journal.append(&JournalRecord::Abort { txn_id: TxnId::new(1) }).unwrap();
        assert!(!journal.is_empty().unwrap());
        journal.reset().unwrap();
        assert!(journal.is_empty().unwrap());
        assert!(journal.read_all().unwrap().is_empty());
    }
}
