//! Journal record types and serialization.

use crate::component::{ComponentId, COMPONENT_ID_LEN};
use crate::error::{TxnError, TxnResult};
use crate::types::{Generation, TxnId};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"QJNL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// Opens a commit group.
    Start = 1,
    /// One component's redo payload.
    Redo = 2,
    /// Closes a commit group; the group is durable once this is synced.
    Commit = 3,
    /// Cancels the open commit group.
    Abort = 4,
}

impl JournalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Start),
            2 => Some(Self::Redo),
            3 => Some(Self::Commit),
            4 => Some(Self::Abort),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Upper-case name used by diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Redo => "REDO",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
        }
    }
}

/// A record in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Start of a commit group.
    Start {
        /// Committing transaction.
        txn_id: TxnId,
        /// Generation the group produces.
        generation: Generation,
    },

    /// Redo entry written by one component.
    Redo {
        /// Component that produced the payload.
        component: ComponentId,
        /// Opaque bytes handed back to `recover`.
        payload: Vec<u8>,
    },

    /// End of a commit group.
    Commit {
        /// Committing transaction.
        txn_id: TxnId,
        /// Generation the group produces.
        generation: Generation,
    },

    /// The open group was abandoned.
    Abort {
        /// Transaction whose group is discarded.
        txn_id: TxnId,
    },
}

impl JournalRecord {
    /// Largest redo payload a record can carry.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize - COMPONENT_ID_LEN - 4;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::Start { .. } => JournalRecordType::Start,
            Self::Redo { .. } => JournalRecordType::Redo,
            Self::Commit { .. } => JournalRecordType::Commit,
            Self::Abort { .. } => JournalRecordType::Abort,
        }
    }

    /// Number of bytes the record occupies in the journal, envelope included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let payload = match self {
            Self::Start { .. } | Self::Commit { .. } => 16,
            Self::Redo { payload, .. } => COMPONENT_ID_LEN + 4 + payload.len(),
            Self::Abort { .. } => 8,
        };
        HEADER_SIZE + payload + CRC_SIZE
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a redo payload exceeds [`Self::MAX_PAYLOAD_SIZE`].
    pub fn encode_payload(&self) -> TxnResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Start { txn_id, generation } | Self::Commit { txn_id, generation } => {
                buf.extend_from_slice(&txn_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&generation.as_u64().to_le_bytes());
            }

            Self::Redo { component, payload } => {
                if payload.len() > Self::MAX_PAYLOAD_SIZE {
                    return Err(TxnError::component(format!(
                        "redo payload of {} bytes from {component} exceeds the journal limit",
                        payload.len()
                    )));
                }
                buf.reserve(COMPONENT_ID_LEN + 4 + payload.len());
                buf.extend_from_slice(&component.to_bytes());
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }

            Self::Abort { txn_id } => {
                buf.extend_from_slice(&txn_id.as_u64().to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    pub fn decode_payload(record_type: JournalRecordType, payload: &[u8]) -> TxnResult<Self> {
        let mut reader = PayloadReader {
            record_type,
            buf: payload,
            pos: 0,
        };

        let record = match record_type {
            JournalRecordType::Start => Self::Start {
                txn_id: TxnId::new(reader.u64()?),
                generation: Generation::new(reader.u64()?),
            },

            JournalRecordType::Commit => Self::Commit {
                txn_id: TxnId::new(reader.u64()?),
                generation: Generation::new(reader.u64()?),
            },

            JournalRecordType::Redo => {
                let component = ComponentId::from_bytes(reader.take(COMPONENT_ID_LEN)?)
                    .ok_or_else(|| TxnError::journal_corruption("invalid component id"))?;
                let len = reader.u32()? as usize;
                let payload = reader.take(len)?.to_vec();
                Self::Redo { component, payload }
            }

            JournalRecordType::Abort => Self::Abort {
                txn_id: TxnId::new(reader.u64()?),
            },
        };

        if reader.pos != payload.len() {
            return Err(TxnError::journal_corruption(format!(
                "trailing bytes in {} record: expected {} bytes, got {}",
                record_type.name(),
                reader.pos,
                payload.len()
            )));
        }

        Ok(record)
    }

    /// Encodes the full record: header, payload and checksum.
    pub fn encode(&self) -> TxnResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| TxnError::component("journal record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

struct PayloadReader<'a> {
    record_type: JournalRecordType,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, n: usize) -> TxnResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(TxnError::journal_corruption(format!(
                "unexpected end of {} payload",
                self.record_type.name()
            )));
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> TxnResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| TxnError::journal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> TxnResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| TxnError::journal_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn component() -> ComponentId {
        ComponentId::new(Uuid::from_bytes([3; 16]), 2)
    }

    #[test]
    fn record_type_bytes() {
        for t in [
            JournalRecordType::Start,
            JournalRecordType::Redo,
            JournalRecordType::Commit,
            JournalRecordType::Abort,
        ] {
            assert_eq!(JournalRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(JournalRecordType::from_byte(0), None);
        assert_eq!(JournalRecordType::from_byte(9), None);
    }

    #[test]
    fn redo_record_decodes() {
        let record = JournalRecord::Redo {
            component: component(),
            payload: vec![0xCA, 0xFE],
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(payload.len(), COMPONENT_ID_LEN + 4 + 2);
        let decoded = JournalRecord::decode_payload(JournalRecordType::Redo, &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn markers_carry_generation() {
        let record = JournalRecord::Commit {
            txn_id: TxnId::new(9),
            generation: Generation::new(4),
        };
        let payload = record.encode_payload().unwrap();
        match JournalRecord::decode_payload(JournalRecordType::Commit, &payload).unwrap() {
            JournalRecord::Commit { txn_id, generation } => {
                assert_eq!(txn_id, TxnId::new(9));
                assert_eq!(generation, Generation::new(4));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let records = [
            JournalRecord::Start {
                txn_id: TxnId::new(1),
                generation: Generation::new(1),
            },
            JournalRecord::Redo {
                component: component(),
                payload: vec![1; 37],
            },
            JournalRecord::Abort {
                txn_id: TxnId::new(1),
            },
        ];
        for record in records {
            assert_eq!(record.encode().unwrap().len(), record.encoded_len());
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = JournalRecord::Abort {
            txn_id: TxnId::new(1),
        }
        .encode_payload()
        .unwrap();
        payload.push(0);
        assert!(matches!(
            JournalRecord::decode_payload(JournalRecordType::Abort, &payload),
            Err(TxnError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn short_redo_rejected() {
        let payload = vec![0u8; 10];
        assert!(JournalRecord::decode_payload(JournalRecordType::Redo, &payload).is_err());
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
