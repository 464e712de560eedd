//! Inspect command implementation.

use super::{format_size, open_journal, CliResult, OutputFormat};
use quadb_core::journal::JournalIterator;
use quadb_core::{CommitGroup, JournalRecord, JournalReplay};
use quadb_storage::StorageBackend;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Journal inspection result.
#[derive(Debug, Default, Serialize)]
pub struct JournalSummary {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Number of readable records.
    pub record_count: u64,
    /// Commit groups that reached their commit marker.
    pub committed_groups: u64,
    /// Groups aborted, superseded or left open at the tail.
    pub discarded_groups: u64,
    /// Highest generation among committed groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_generation: Option<u64>,
    /// Offset just past the committed prefix.
    pub committed_end: u64,
    /// The journal ends in a partially written record.
    pub truncated_tail: bool,
    /// Redo entries in committed groups, per component.
    pub redo_entries: BTreeMap<String, u64>,
    /// First corruption found, if any. Nothing after it was read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let backend = open_journal(path)?;
    let mut summary = summarize(&backend)?;
    summary.path = path.display().to_string();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_text_output(&summary),
    }
    Ok(())
}

/// Scans `backend` as a journal.
///
/// Corruption is reported in [`JournalSummary::error`] rather than as an
/// error; only I/O failures are returned.
pub fn summarize(backend: &dyn StorageBackend) -> CliResult<JournalSummary> {
    let mut summary = JournalSummary {
        journal_size: backend.size()?,
        ..JournalSummary::default()
    };

    let mut replay = JournalReplay::new();
    let mut next_offset = 0;
    let mut records = JournalIterator::new(backend, 0)?;
    for item in records.by_ref() {
        match item {
            Ok((offset, record)) => {
                next_offset = offset + record.encoded_len() as u64;
                if let Some(group) = replay.feed(offset, record) {
                    count_entries(&mut summary, &group);
                }
            }
            Err(e) => {
                summary.error = Some(format!("at offset {next_offset}: {e}"));
                break;
            }
        }
    }
    if let Some(group) = replay.finish() {
        count_entries(&mut summary, &group);
    }

    summary.record_count = replay.record_count();
    summary.committed_groups = replay.committed_groups();
    summary.discarded_groups = replay.discarded_groups();
    summary.highest_generation = replay.highest_generation().map(|g| g.as_u64());
    summary.committed_end = replay.committed_end();
    summary.truncated_tail = records.truncated_tail();
    Ok(summary)
}

fn count_entries(summary: &mut JournalSummary, group: &CommitGroup) {
    for (component, _) in &group.entries {
        *summary.redo_entries.entry(component.to_string()).or_default() += 1;
    }
}

/// Short text describing a record, shared with `dump-journal`.
pub fn describe(record: &JournalRecord) -> String {
    match record {
        JournalRecord::Start { txn_id, generation } | JournalRecord::Commit { txn_id, generation } => {
            format!("{txn_id} {generation}")
        }
        JournalRecord::Redo { component, payload } => {
            format!("{component} {} bytes", payload.len())
        }
        JournalRecord::Abort { txn_id } => txn_id.to_string(),
    }
}

fn print_text_output(summary: &JournalSummary) {
    println!("quadb Journal Inspection");
    println!("========================");
    println!();
    println!("Path: {}", summary.path);
    println!();
    println!("Journal:");
    println!("  Size:            {}", format_size(summary.journal_size));
    println!("  Records:         {}", summary.record_count);
    println!("  Committed end:   {}", summary.committed_end);
    println!("  Truncated tail:  {}", summary.truncated_tail);
    println!();
    println!("Groups:");
    println!("  Committed:       {}", summary.committed_groups);
    println!("  Discarded:       {}", summary.discarded_groups);
    match summary.highest_generation {
        Some(generation) => println!("  Highest gen:     {generation}"),
        None => println!("  Highest gen:     -"),
    }

    if !summary.redo_entries.is_empty() {
        println!();
        println!("Redo entries:");
        for (component, count) in &summary.redo_entries {
            println!("  {component}: {count}");
        }
    }

    if let Some(error) = &summary.error {
        println!();
        println!("Corruption: {error}");
    }
}
