//! CLI command implementations.

pub mod dump_journal;
pub mod inspect;
pub mod verify;

use quadb_core::StoreDir;
use quadb_storage::FileBackend;
use std::path::Path;

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Output format for commands that print structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the journal of the store at `path` without taking the store lock.
///
/// Refuses to create a journal that does not exist yet.
pub fn open_journal(path: &Path) -> CliResult<FileBackend> {
    let journal = StoreDir::journal_path_in(path);
    if !journal.exists() {
        return Err(format!("No journal found at {}", journal.display()).into());
    }
    Ok(FileBackend::open(&journal)?)
}

/// Formats a byte count for text output.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
