//! CLI command implementations.

pub mod queue;
pub mod state;
pub mod verify;

use agrisync_storage::InMemoryBackend;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Loads a journal file into memory so read-only commands never touch it.
pub fn snapshot(path: &Path) -> Result<InMemoryBackend, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No journal found at {:?}", path).into());
    }
    Ok(InMemoryBackend::with_data(std::fs::read(path)?))
}
