//! Concurrency stress helpers for the offline queue.

use agrisync_engine::OfflineOperationQueue;
use agrisync_protocol::{EntityRecord, OperationType, SyncPriority, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations attempted.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Wall time.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Enqueues `count` operations cycling through every priority class.
///
/// Returns the operation ids in enqueue order.
pub fn fill_queue(queue: &OfflineOperationQueue, count: usize, now: Timestamp) -> Vec<String> {
    (0..count)
        .map(|i| {
            let record = EntityRecord::new("product", format!("p-{i}"), now).dirty();
            let priority = SyncPriority::ALL[i % SyncPriority::ALL.len()];
            let payload = agrisync_protocol::encode_payload(&record).expect("payload encodes");
            queue
                .enqueue(
                    &record.entity_type,
                    &record.entity_id,
                    OperationType::Update,
                    payload,
                    Some(priority),
                    now,
                )
                .expect("enqueue")
        })
        .collect()
}

/// Ids handed out by concurrent claimers.
#[derive(Debug, Clone)]
pub struct ClaimReport {
    /// Every claimed id, across threads.
    pub claimed: Vec<String>,
    /// Timing.
    pub result: StressTestResult,
}

impl ClaimReport {
    /// Ids claimed more than once.
    pub fn duplicates(&self) -> Vec<String> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for id in &self.claimed {
            *seen.entry(id.as_str()).or_default() += 1;
        }
        let mut duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(id, _)| id.to_string())
            .collect();
        duplicates.sort();
        duplicates
    }
}

/// Runs `threads` workers that claim and complete batches until the queue
/// has nothing claimable.
pub fn concurrent_claims(
    queue: Arc<OfflineOperationQueue>,
    threads: usize,
    batch_size: usize,
    now: Timestamp,
) -> ClaimReport {
    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut claimed = Vec::new();
                let mut failed = 0;
                loop {
                    let batch = match queue.claim_pending(batch_size, now) {
                        Ok(batch) => batch,
                        Err(_) => {
                            failed += 1;
                            break;
                        }
                    };
                    if batch.is_empty() {
                        break;
                    }
                    for op in batch {
                        if queue.complete(&op.operation_id, now).is_err() {
                            failed += 1;
                        }
                        claimed.push(op.operation_id);
                    }
                }
                (claimed, failed)
            })
        })
        .collect();

    let mut claimed = Vec::new();
    let mut failed = 0;
    for handle in handles {
        let (ids, errors) = handle.join().expect("claimer thread panicked");
        claimed.extend(ids);
        failed += errors;
    }

    let result = StressTestResult::new(claimed.len(), failed, start.elapsed());
    ClaimReport { claimed, result }
}
