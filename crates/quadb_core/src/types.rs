//! Core type definitions.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// coordinator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Version of the committed data.
///
/// Each successful write commit produces the next generation. Aborts never
/// advance it and it never goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// Creates a generation.
    #[must_use]
    pub const fn new(gen: u64) -> Self {
        Self(gen)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the generation a commit on top of this one produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen:{}", self.0)
    }
}

/// The kind of transaction requested at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnType {
    /// Read-only for its whole life.
    Read,
    /// Writer from the start; holds the single writer slot.
    Write,
    /// Starts as a reader; may promote only if no commit happened since it began.
    ReadPromote,
    /// Starts as a reader; promotion moves it onto the latest committed generation.
    ReadCommittedPromote,
}

impl TxnType {
    /// The mode a transaction of this type starts in.
    #[must_use]
    pub const fn initial_mode(self) -> ReadWrite {
        match self {
            Self::Write => ReadWrite::Write,
            Self::Read | Self::ReadPromote | Self::ReadCommittedPromote => ReadWrite::Read,
        }
    }

    /// Whether a transaction of this type may ever write.
    #[must_use]
    pub const fn is_write_capable(self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for TxnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadPromote => "READ_PROMOTE",
            Self::ReadCommittedPromote => "READ_COMMITTED_PROMOTE",
        };
        f.write_str(name)
    }
}

/// Current access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadWrite {
    /// Reading a fixed generation.
    Read,
    /// Holding the writer slot.
    Write,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Created but `begin` has not run yet.
    Inactive,
    /// Open for reads and writes.
    Active,
    /// Commit started; components are preparing.
    Preparing,
    /// Commit finished.
    Committed,
    /// Rolled back.
    Aborted,
    /// Resources released; terminal.
    Ended,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Preparing => "PREPARING",
            Self::Committed => "COMMITTED",
            Self::Aborted => "ABORTED",
            Self::Ended => "ENDED",
        };
        f.write_str(name)
    }
}

/// The view of a transaction handed to components and listeners.
///
/// `generation` is the committed generation the transaction reads. A write
/// commit publishes its changes as `generation.next()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnContext {
    /// Transaction identifier.
    pub id: TxnId,
    /// Type requested at begin.
    pub txn_type: TxnType,
    /// Current access mode (changes on promotion).
    pub mode: ReadWrite,
    /// Generation the transaction is bound to.
    pub generation: Generation,
}

impl TxnContext {
    /// Returns true if the transaction currently holds write access.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.mode == ReadWrite::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_next() {
        assert_eq!(Generation::new(5).next(), Generation::new(6));
        assert!(Generation::new(1) < Generation::new(2));
    }

    #[test]
    fn initial_modes() {
        assert_eq!(TxnType::Write.initial_mode(), ReadWrite::Write);
        assert_eq!(TxnType::ReadPromote.initial_mode(), ReadWrite::Read);
        assert_eq!(TxnType::ReadCommittedPromote.initial_mode(), ReadWrite::Read);
        assert!(!TxnType::Read.is_write_capable());
        assert!(TxnType::ReadPromote.is_write_capable());
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", TxnId::new(7)), "txn:7");
        assert_eq!(format!("{}", Generation::new(3)), "gen:3");
        assert_eq!(TxnType::ReadCommittedPromote.to_string(), "READ_COMMITTED_PROMOTE");
        assert_eq!(TxnState::Preparing.to_string(), "PREPARING");
    }
}
