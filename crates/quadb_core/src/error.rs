//! Error types for the transaction core.

use crate::component::ComponentId;
use crate::types::Generation;
use std::io;
use thiserror::Error;

/// Result type for transaction-core operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors raised by the coordinator, the journal and transactions.
///
/// Admission refusal is *not* an error: the non-blocking `begin` forms
/// return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] quadb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal is corrupted or has an unknown format.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A journal record failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// An operation was called in the wrong lifecycle state.
    #[error("lifecycle violation: {message}")]
    Lifecycle {
        /// Description of the state mismatch.
        message: String,
    },

    /// The coordinator has not been started yet.
    #[error("transaction coordinator has not been started")]
    NotStarted,

    /// The coordinator has been shut down.
    #[error("transaction coordinator has been shut down")]
    ShutDown,

    /// Configuration changes are only allowed before `start()` or inside `modify_config`.
    #[error("transaction coordinator configuration is locked")]
    ConfigurationLocked,

    /// The transaction type cannot be promoted.
    #[error("cannot promote a {txn_type} transaction")]
    PromotionNotAllowed {
        /// The transaction type that was asked to promote.
        txn_type: crate::types::TxnType,
    },

    /// A component refused to prepare; the transaction was aborted everywhere.
    #[error("commit failed in prepare of {component}: {reason}")]
    CommitFailed {
        /// The component whose prepare step failed.
        component: ComponentId,
        /// The failure reported by the component.
        reason: String,
    },

    /// The journal could not record the commit; the transaction was rolled back.
    #[error("commit failed writing the journal: {reason}")]
    JournalWriteFailed {
        /// Description of the journal failure.
        reason: String,
    },

    /// A component failed after the journal durably recorded the commit.
    ///
    /// In-process state is no longer trustworthy; the next start replays the
    /// journal.
    #[error("fatal commit failure at {generation}: {} component(s) failed after the commit point", failures.len())]
    CommitFatal {
        /// Generation that the journal recorded as committed.
        generation: Generation,
        /// Each failing component with its error message.
        failures: Vec<(ComponentId, String)>,
    },

    /// The journal write failed after the commit marker was written and the
    /// marker could not be withdrawn.
    ///
    /// Components were rolled back, but the journal may still replay the
    /// commit; the coordinator is poisoned until restart decides.
    #[error("commit outcome in doubt: {reason}")]
    CommitInDoubt {
        /// Description of the journal failures.
        reason: String,
    },

    /// An earlier fatal commit failure poisoned this coordinator.
    #[error("transaction coordinator requires recovery after a fatal commit failure")]
    RecoveryRequired,

    /// Recovery found a journal entry for a component nobody registered.
    #[error("journal entry references unregistered component {0}")]
    UnknownComponent(ComponentId),

    /// Gate calls were unbalanced (e.g. `enable_writers` without `disable_writers`).
    #[error("gate mismatch: {message}")]
    GateMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store directory is missing or malformed.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A transactional component reported a failure.
    #[error("component error: {message}")]
    Component {
        /// Description of the failure.
        message: String,
    },
}

impl TxnError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates a lifecycle violation error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Creates a gate mismatch error.
    pub fn gate_mismatch(message: impl Into<String>) -> Self {
        Self::GateMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a component error.
    pub fn component(message: impl Into<String>) -> Self {
        Self::Component {
            message: message.into(),
        }
    }

    /// Returns true for errors a caller may retry with a fresh transaction.
    ///
    /// Lifecycle violations and fatal commit failures are programming or
    /// system errors; retrying them does not help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommitFailed { .. } | Self::JournalWriteFailed { .. }
        )
    }
}
