//! Queue inspection and maintenance commands.

use super::snapshot;
use agrisync_engine::{OfflineOperationQueue, QueueFilter, QueueStats};
use agrisync_protocol::{OperationState, QueuedOperation};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// One operation as printed by `list`.
#[derive(Debug, Serialize)]
pub struct OperationRow {
    /// Operation id.
    pub operation_id: String,
    /// Entity type tag.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
    /// Mutation kind.
    pub operation_type: String,
    /// Lifecycle state.
    pub state: String,
    /// Priority class.
    pub priority: String,
    /// Failed attempts over the retry budget, e.g. `1/3`.
    pub attempts: String,
    /// Enqueue time, epoch milliseconds.
    pub created_at: i64,
    /// Last failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&QueuedOperation> for OperationRow {
    fn from(op: &QueuedOperation) -> Self {
        Self {
            operation_id: op.operation_id.clone(),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            operation_type: format!("{:?}", op.operation_type).to_uppercase(),
            state: op.state.to_string(),
            priority: op.priority.to_string(),
            attempts: format!("{}/{}", op.retry_count, op.max_retries),
            created_at: op.created_at,
            error: op.error_message.clone(),
        }
    }
}

/// Prints queue counters.
pub fn stats(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = OfflineOperationQueue::open(Box::new(snapshot(path)?))?;
    let stats = queue.stats();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        _ => print!("{}", render_stats(path, &stats)),
    }
    Ok(())
}

/// Prints operations matching the filters, in drain order.
pub fn list(
    path: &Path,
    state: Option<&str>,
    entity_type: Option<String>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = QueueFilter {
        state: state.map(parse_state).transpose()?,
        entity_type,
        priority: None,
    };
    let queue = OfflineOperationQueue::open(Box::new(snapshot(path)?))?;

    let mut ops = queue.list(&filter);
    ops.sort_by_key(|op| op.drain_order());
    let rows: Vec<OperationRow> = ops
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(OperationRow::from)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            if rows.is_empty() {
                println!("No matching operations");
            }
            for row in &rows {
                println!(
                    "{}  {:<11} {:<10} {:<6} {}/{}  {}",
                    row.operation_id,
                    row.state,
                    row.priority,
                    row.operation_type,
                    row.entity_type,
                    row.entity_id,
                    row.attempts
                );
                if let Some(error) = &row.error {
                    println!("    last error: {}", error);
                }
            }
        }
    }
    Ok(())
}

/// Re-arms one failed operation.
pub fn retry(path: &Path, operation_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = OfflineOperationQueue::open_file(path)?;
    queue.retry_failed(operation_id)?;
    println!("Operation {} re-armed", operation_id);
    Ok(())
}

/// Re-arms every exhausted operation.
pub fn retry_all(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let queue = OfflineOperationQueue::open_file(path)?;
    let count = queue.retry_all_failed()?;
    println!("Re-armed {} operation(s)", count);
    Ok(())
}

/// Cancels one operation.
pub fn cancel(path: &Path, operation_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = OfflineOperationQueue::open_file(path)?;
    queue.cancel(operation_id)?;
    println!("Operation {} cancelled", operation_id);
    Ok(())
}

/// Drops completed operations older than the retention window.
pub fn cleanup(
    path: &Path,
    retention_days: u64,
    now: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = OfflineOperationQueue::open_file(path)?;
    let retention = Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY));
    let removed = queue.cleanup(retention, now)?;
    println!(
        "Removed {} completed operation(s), {} remaining",
        removed,
        queue.len()
    );
    Ok(())
}

fn parse_state(name: &str) -> Result<OperationState, String> {
    OperationState::parse(name).ok_or_else(|| format!("Unknown operation state: {}", name))
}

fn render_stats(path: &Path, stats: &QueueStats) -> String {
    format!(
        "AgriSync Operation Queue\n\
         ========================\n\
         \n\
         Path: {}\n\
         \n\
         Operations:\n\
         \x20 Pending:      {}\n\
         \x20 In progress:  {}\n\
         \x20 Failed:       {}\n\
         \x20 Exhausted:    {}\n\
         \x20 Completed:    {}\n\
         \x20 Cancelled:    {}\n\
         \x20 Total:        {}\n",
        path.display(),
        stats.pending,
        stats.in_progress,
        stats.failed,
        stats.exhausted,
        stats.completed,
        stats.cancelled,
        stats.total()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrisync_protocol::{OperationType, SyncPriority};

    #[test]
    fn row_shows_attempts_and_error() {
        let mut op = QueuedOperation::new(
            "op-1",
            "order",
            "o-1",
            OperationType::Update,
            Vec::new(),
            SyncPriority::Critical,
            10,
            0,
        );
        op.retry_count = 2;
        op.error_message = Some("timeout".into());

        let row = OperationRow::from(&op);
        assert_eq!(row.operation_type, "UPDATE");
        assert_eq!(row.attempts, "2/3");
        assert_eq!(row.priority, "critical");
        assert_eq!(row.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!(parse_state("in-progress").is_ok());
        assert!(parse_state("sleeping").is_err());
    }

    #[test]
    fn maintenance_commands_rewrite_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.journal");
        let id = {
            let queue = OfflineOperationQueue::open_file(&path).unwrap();
            let id = queue
                .enqueue("order", "o-1", OperationType::Create, Vec::new(), None, 0)
                .unwrap();
            queue.claim_pending(1, 0).unwrap();
            queue.complete(&id, 0).unwrap();
            id
        };

        cleanup(&path, 1, 2 * 86_400_000).unwrap();
        let queue = OfflineOperationQueue::open_file(&path).unwrap();
        assert!(queue.get(&id).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.journal");
        let id = {
            let queue = OfflineOperationQueue::open_file(&path).unwrap();
            let id = queue
                .enqueue("order", "o-1", OperationType::Create, Vec::new(), None, 0)
                .unwrap();
            queue.claim_pending(1, 0).unwrap();
            queue.complete(&id, 0).unwrap();
            id
        };

        // 2^32 + 1 days would wrap to one day if narrowed to u32.
        cleanup(&path, (1u64 << 32) + 1, 2 * 86_400_000).unwrap();
        cleanup(&path, u64::MAX, 2 * 86_400_000).unwrap();
        let queue = OfflineOperationQueue::open_file(&path).unwrap();
        assert!(queue.get(&id).is_some());
    }
}
