//! Crash simulation for journal recovery tests.
//!
//! A crash is simulated in two ways:
//!
//! 1. **Mid-append**: [`CrashableBackend`] stops writing after a byte budget,
//!    keeping the partial record that straddles the limit, and refuses every
//!    later write, sync and truncate. The store is then reopened over the
//!    bytes that made it.
//! 2. **Torn tail**: [`tear_tail`] cuts bytes off a journal directly.
//!
//! [`CrashControl`] can also fail syncs and truncates without crashing, for
//! journal failures the process survives.
//!
//! ## Usage
//!
//! ```rust
//! use quadb_storage::{InMemoryBackend, StorageBackend};
//! use quadb_testkit::CrashableBackend;
//!
//! let inner = InMemoryBackend::new();
//! let bytes = inner.share();
//! let mut backend = CrashableBackend::new(Box::new(inner));
//! let control = backend.control();
//!
//! control.crash_after(3);
//! assert!(backend.append(b"abcdef").is_err());
//! assert!(control.has_crashed());
//! assert_eq!(bytes.data(), b"abc");
//! ```

use quadb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Switches for a [`CrashableBackend`] that stay usable after the backend
/// has been handed to a coordinator.
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
    failing_syncs: AtomicUsize,
    fail_on_truncate: AtomicBool,
}

impl CrashControl {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
            failing_syncs: AtomicUsize::new(0),
            fail_on_truncate: AtomicBool::new(false),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail without losing data.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` flushes or syncs fail without losing data.
    pub fn fail_syncs(&self, count: usize) {
        self.failing_syncs.store(count, Ordering::SeqCst);
    }

    /// Makes `truncate` fail.
    pub fn set_fail_on_truncate(&self, fail: bool) {
        self.fail_on_truncate.store(fail, Ordering::SeqCst);
    }

    fn sync_fails(&self) -> bool {
        self.fail_on_sync.load(Ordering::SeqCst)
            || self
                .failing_syncs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    /// Bytes appended through the backend so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Clears the crash and every switch.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
        self.failing_syncs.store(0, Ordering::SeqCst);
        self.fail_on_truncate.store(false, Ordering::SeqCst);
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("simulated crash during {what}"),
    ))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            control: Arc::new(CrashControl::new()),
        }
    }

    /// Returns the switches for this backend.
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.control.has_crashed() {
            return Err(simulated(what));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check_alive("write")?;
        let control = &self.control;
        let current = control.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let threshold = control.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(bytes.len()) > threshold {
            control.crashed.store(true, Ordering::SeqCst);
            let partial_len = threshold.saturating_sub(current);
            if partial_len > 0 {
                self.inner.append(&bytes[..partial_len])?;
            }
            return Err(simulated("partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_alive("flush")?;
        if self.control.sync_fails() {
            return Err(simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_alive("sync")?;
        if self.control.sync_fails() {
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        if self.control.fail_on_truncate.load(Ordering::SeqCst) {
            return Err(simulated("truncate"));
        }
        self.inner.truncate(new_size)
    }
}

/// Cuts `bytes` off the end of an in-memory journal, as a crash in the
/// middle of the last append would.
pub fn tear_tail(journal: &InMemoryBackend, bytes: usize) {
    let mut data = journal.data();
    let keep = data.len().saturating_sub(bytes);
    data.truncate(keep);
    journal.replace(data);
}
