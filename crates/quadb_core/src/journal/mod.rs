//! The commit journal.
//!
//! The journal is the coordinator's durability point. Each write commit
//! appends one group and syncs it before any component makes its changes
//! visible; after a crash the complete groups are replayed into the
//! components that wrote them.
//!
//! ## Record Format
//!
//! ```text
//! | magic "QJNL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Little-endian throughout; the CRC covers header and payload.
//!
//! ## Groups
//!
//! ```text
//! START(txn, gen) REDO(component, bytes)* COMMIT(txn, gen)
//! ```
//!
//! ## Recovery Policy
//!
//! Tolerated (clean end of journal): a truncated header or payload at the
//! tail, left by a crash mid-append. The group it belonged to never reached
//! its commit marker and is discarded.
//!
//! Fatal: bad magic, unsupported version, unknown record type, CRC
//! mismatch. These mean real corruption and the coordinator refuses to
//! start.

mod iterator;
mod record;
mod replay;
mod writer;

pub use iterator::JournalIterator;
pub use record::{compute_crc32, JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use replay::{CommitGroup, JournalReplay};
pub use writer::{Journal, JournalRecords};
