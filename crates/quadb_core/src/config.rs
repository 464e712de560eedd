//! Coordinator configuration.

/// Configuration for a [`crate::TransactionCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether the commit marker is synced to stable storage (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to truncate the journal after every successful commit.
    ///
    /// When disabled the journal keeps every commit group and each restart
    /// replays all of them.
    pub reset_journal_after_commit: bool,

    /// Whether promotion waits for the writer slot or fails at once.
    pub promotion_waits_for_writers: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            reset_journal_after_commit: true,
            promotion_waits_for_writers: true,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal at the commit point.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether the journal is truncated after each commit.
    #[must_use]
    pub const fn reset_journal_after_commit(mut self, value: bool) -> Self {
        self.reset_journal_after_commit = value;
        self
    }

    /// Sets whether promotion blocks for the writer slot.
    #[must_use]
    pub const fn promotion_waits_for_writers(mut self, value: bool) -> Self {
        self.promotion_waits_for_writers = value;
        self
    }
}
