//! Streaming journal record iterator.

use crate::error::{TxnError, TxnResult};
use crate::journal::record::{
    compute_crc32, JournalRecord, JournalRecordType, CRC_SIZE, HEADER_SIZE, JOURNAL_MAGIC,
    JOURNAL_VERSION,
};
use quadb_storage::StorageBackend;
use std::ops::Deref;

/// A streaming iterator over journal records.
///
/// Records are read one at a time from the backend, so memory use does not
/// grow with the journal. Each item is `(offset, record)`.
///
/// # Error Handling
///
/// - A truncated header or payload at the tail ends the iteration cleanly;
///   [`truncated_tail`](Self::truncated_tail) reports it afterwards.
/// - Bad magic, an unsupported version, an unknown record type or a CRC
///   mismatch yields an error and ends the iteration.
pub struct JournalIterator<B> {
    backend: B,
    total_size: u64,
    offset: u64,
    finished: bool,
    truncated_tail: bool,
}

impl<B, S> JournalIterator<B>
where
    B: Deref<Target = S>,
    S: StorageBackend + ?Sized,
{
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: B, start_offset: u64) -> TxnResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            finished: false,
            truncated_tail: false,
        })
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// True once the iterator stopped on an incomplete record at the tail.
    #[must_use]
    pub fn truncated_tail(&self) -> bool {
        self.truncated_tail
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn stop_truncated(&mut self) -> TxnResult<Option<(u64, JournalRecord)>> {
        self.finished = true;
        self.truncated_tail = true;
        Ok(None)
    }

    fn corrupt(&mut self, message: String) -> TxnResult<Option<(u64, JournalRecord)>> {
        self.finished = true;
        Err(TxnError::journal_corruption(message))
    }

    fn read_next_record(&mut self) -> TxnResult<Option<(u64, JournalRecord)>> {
        if self.finished {
            return Ok(None);
        }

        let start = self.offset;
        let remaining = self.remaining();
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return self.stop_truncated();
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;

        if header[0..4] != JOURNAL_MAGIC {
            return self.corrupt(format!("invalid magic at offset {start}"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version == 0 || version > JOURNAL_VERSION {
            return self.corrupt(format!("unsupported version {version} at offset {start}"));
        }

        let type_byte = header[6];
        let Some(record_type) = JournalRecordType::from_byte(type_byte) else {
            return self.corrupt(format!("unknown record type {type_byte} at offset {start}"));
        };

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
        if remaining < total_len as u64 {
            return self.stop_truncated();
        }

        let body = self.backend.read_at(start, total_len)?;
        let crc_start = HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            body[crc_start],
            body[crc_start + 1],
            body[crc_start + 2],
            body[crc_start + 3],
        ]);
        let computed_crc = compute_crc32(&body[..crc_start]);
        if stored_crc != computed_crc {
            self.finished = true;
            return Err(TxnError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = match JournalRecord::decode_payload(record_type, &body[HEADER_SIZE..crc_start]) {
            Ok(record) => record,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        self.offset += total_len as u64;
        Ok(Some((start, record)))
    }
}

impl<B, S> Iterator for JournalIterator<B>
where
    B: Deref<Target = S>,
    S: StorageBackend + ?Sized,
{
    type Item = TxnResult<(u64, JournalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_record().transpose()
    }
}

impl<B> std::fmt::Debug for JournalIterator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalIterator")
            .field("total_size", &self.total_size)
            .field("offset", &self.offset)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Generation, TxnId};
    use proptest::prelude::*;
    use quadb_storage::InMemoryBackend;

    fn start(n: u64) -> JournalRecord {
        JournalRecord::Start {
            txn_id: TxnId::new(n),
            generation: Generation::new(n),
        }
    }

    fn encode_all(records: &[JournalRecord]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| r.encode().unwrap())
            .collect()
    }

    fn scan(bytes: Vec<u8>) -> (Vec<JournalRecord>, bool, TxnResult<()>) {
        let backend = InMemoryBackend::with_data(bytes);
        let mut iter = JournalIterator::new(&backend, 0).unwrap();
        let mut records = Vec::new();
        let mut outcome = Ok(());
        for item in iter.by_ref() {
            match item {
                Ok((_, record)) => records.push(record),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        let truncated = iter.truncated_tail();
        (records, truncated, outcome)
    }

    #[test]
    fn empty_journal_yields_nothing() {
        let (records, truncated, outcome) = scan(Vec::new());
        assert!(records.is_empty());
        assert!(!truncated);
        assert!(outcome.is_ok());
    }

    #[test]
    fn offsets_and_position() {
        let bytes = encode_all(&[start(1), start(2)]);
        let backend = InMemoryBackend::with_data(bytes.clone());
        let mut iter = JournalIterator::new(&backend, 0).unwrap();

        let (first, _) = iter.next().unwrap().unwrap();
        assert_eq!(first, 0);
        let after_first = iter.position();
        let (second, _) = iter.next().unwrap().unwrap();
        assert_eq!(second, after_first);
        assert!(iter.next().is_none());
        assert_eq!(iter.position(), bytes.len() as u64);
    }

    #[test]
    fn crc_mismatch_is_fatal() {
        let mut bytes = encode_all(&[start(1), start(2)]);
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        let (records, _, outcome) = scan(bytes);
        assert!(records.is_empty());
        assert!(matches!(outcome, Err(TxnError::ChecksumMismatch { .. })));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut bytes = encode_all(&[start(1)]);
        bytes[0] = b'X';
        let (_, _, outcome) = scan(bytes);
        assert!(matches!(outcome, Err(TxnError::JournalCorruption { .. })));
    }

    #[test]
    fn unknown_type_is_fatal() {
        let mut bytes = encode_all(&[start(1)]);
        bytes[6] = 42;
        let (_, _, outcome) = scan(bytes);
        assert!(matches!(outcome, Err(TxnError::JournalCorruption { .. })));
    }

    #[test]
    fn future_version_is_fatal() {
        let mut bytes = encode_all(&[start(1)]);
        bytes[4..6].copy_from_slice(&(JOURNAL_VERSION + 1).to_le_bytes());
        let (_, _, outcome) = scan(bytes);
        assert!(matches!(outcome, Err(TxnError::JournalCorruption { .. })));
    }

    proptest! {
        #[test]
        fn truncated_tail_is_clean_end(count in 1usize..6, cut in 1usize..31) {
            let records: Vec<_> = (0..count as u64).map(start).collect();
            let full = encode_all(&records);
            let record_len = records[0].encoded_len();
            prop_assume!(cut < record_len);
            let bytes = full[..full.len() - cut].to_vec();

            let (decoded, truncated, outcome) = scan(bytes);
            prop_assert!(outcome.is_ok());
            prop_assert!(truncated);
            prop_assert_eq!(decoded, records[..count - 1].to_vec());
        }
    }
}
