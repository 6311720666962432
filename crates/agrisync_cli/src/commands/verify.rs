//! Journal verification command.

use super::snapshot;
use agrisync_storage::Journal;
use serde::Serialize;
use std::path::Path;

/// Verification result.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct VerifyResult {
    /// Journal size in bytes.
    pub size: u64,
    /// Intact records.
    pub records: usize,
    /// Bytes after the last intact record.
    pub torn_bytes: u64,
}

/// Runs the verify command. The file itself is never modified.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let result = check(path)?;

    println!("Journal: {}", path.display());
    println!("  Size:    {} bytes", result.size);
    println!("  Records: {}", result.records);
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail: {} bytes (dropped on next open)",
            result.torn_bytes
        );
    } else {
        println!("  OK");
    }
    Ok(())
}

/// Scans a journal and reports what recovery would keep.
pub fn check(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let backend = snapshot(path)?;
    let size = backend.data().len() as u64;
    let (_, recovery) = Journal::open(Box::new(backend))?;
    Ok(VerifyResult {
        size,
        records: recovery.records.len(),
        torn_bytes: recovery.discarded_bytes,
    })
}
