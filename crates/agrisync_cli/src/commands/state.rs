//! Sync state command.

use super::snapshot;
use agrisync_engine::{JournalSyncStateStore, SyncStateStore};
use std::path::Path;

/// Prints the device's per-domain watermarks.
pub fn show(path: &Path, device_id: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = JournalSyncStateStore::open(Box::new(snapshot(path)?), device_id)?;
    let state = store.get()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&state)?),
        _ => {
            println!("AgriSync Sync State");
            println!("===================");
            println!();
            println!("Device: {}", state.device_id);
            match state.last_pass_at {
                Some(at) => println!(
                    "Last pass: {} ({})",
                    at,
                    if state.last_pass_ok { "ok" } else { "with failures" }
                ),
                None => println!("Last pass: never"),
            }
            println!();
            println!("Watermarks:");
            if state.watermarks.is_empty() {
                println!("  (none)");
            }
            for (domain, watermark) in &state.watermarks {
                println!("  {:<16} {}", domain, watermark);
            }
        }
    }
    Ok(())
}
