//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock, one process at a time
//! └─ journal.jrnl      # Commit journal
//! ```
//!
//! Components keep their own files next to these; the coordinator only
//! owns the two above.

use crate::error::{TxnError, TxnResult};
use fs2::FileExt;
use quadb_storage::FileBackend;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.jrnl";

/// An opened store directory.
///
/// Holds an exclusive advisory lock on `LOCK` for as long as it lives, so
/// at most one coordinator per directory exists across processes.
///
/// # Example
///
/// ```rust,no_run
/// use quadb_core::StoreDir;
/// use std::path::Path;
///
/// let dir = StoreDir::open(Path::new("my_store"), true)?;
/// println!("journal: {}", dir.journal_path().display());
/// # Ok::<(), quadb_core::TxnError>(())
/// ```
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and locks it.
    ///
    /// # Errors
    ///
    /// - [`TxnError::InvalidFormat`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`TxnError::StoreLocked`] if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> TxnResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(TxnError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(TxnError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(TxnError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the commit journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        Self::journal_path_in(&self.path)
    }

    /// Path the journal of a store at `path` would have, without opening or
    /// locking anything. Read-only tools use this.
    #[must_use]
    pub fn journal_path_in(path: &Path) -> PathBuf {
        path.join(JOURNAL_FILE)
    }

    /// Returns true if no journal has been created yet.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.journal_path().exists()
    }

    /// Opens (creating if needed) the journal file.
    pub fn open_journal_backend(&self) -> TxnResult<FileBackend> {
        let created = self.is_new_store();
        let backend = FileBackend::open(&self.journal_path())?;
        if created {
            self.sync_directory()?;
        }
        Ok(backend)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> TxnResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> TxnResult<()> {
        Ok(())
    }
}
