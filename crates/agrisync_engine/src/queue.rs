//! Offline operation queue.
//!
//! Mutations made while offline are queued here and drained in priority
//! order once connectivity allows. Every transition is committed to the
//! journal (when one is attached) before it becomes visible in memory, and
//! a claim moves its whole batch to `IN_PROGRESS` under one lock and one
//! journal record, so no operation is handed to two processors at once.

use crate::config::millis;
use crate::error::{SyncError, SyncResult};
use crate::observer::{SyncObserver, TracingObserver};
use agrisync_protocol::{
    encode_payload, from_cbor, to_cbor, EntityRecord, OperationState, OperationType,
    QueuedOperation, SyncPriority, Timestamp, DEFAULT_MAX_RETRIES,
};
use agrisync_storage::{FileBackend, Journal, StorageBackend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One journal entry.
#[derive(Debug, Serialize, Deserialize)]
enum QueueRecord {
    /// Insert or replace these operations.
    Put(Vec<QueuedOperation>),
    /// Remove these operation ids.
    Delete(Vec<String>),
}

/// Operation counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting to be claimed.
    pub pending: usize,
    /// Claimed by a drain cycle.
    pub in_progress: usize,
    /// Acknowledged.
    pub completed: usize,
    /// Failed with retries left.
    pub failed: usize,
    /// Failed with no retries left.
    pub exhausted: usize,
    /// Withdrawn.
    pub cancelled: usize,
}

impl QueueStats {
    /// Total operations.
    pub fn total(&self) -> usize {
        self.pending
            + self.in_progress
            + self.completed
            + self.failed
            + self.exhausted
            + self.cancelled
    }
}

/// Selects operations in [`OfflineOperationQueue::list`].
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    /// Only this state.
    pub state: Option<OperationState>,
    /// Only this entity type.
    pub entity_type: Option<String>,
    /// Only this priority class.
    pub priority: Option<SyncPriority>,
}

impl QueueFilter {
    fn matches(&self, op: &QueuedOperation) -> bool {
        self.state.map_or(true, |s| s == op.state)
            && self
                .entity_type
                .as_deref()
                .map_or(true, |t| t == op.entity_type)
            && self.priority.map_or(true, |p| p == op.priority)
    }
}

struct QueueInner {
    ops: HashMap<String, QueuedOperation>,
    next_sequence: u64,
    journal: Option<Journal>,
}

impl QueueInner {
    fn persist(&mut self, record: &QueueRecord) -> SyncResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            let bytes = to_cbor(record)?;
            journal.append(&bytes)?;
        }
        Ok(())
    }

    /// Persists then publishes new versions of operations.
    fn commit(&mut self, ops: Vec<QueuedOperation>) -> SyncResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let record = QueueRecord::Put(ops);
        self.persist(&record)?;
        if let QueueRecord::Put(ops) = record {
            for op in ops {
                self.ops.insert(op.operation_id.clone(), op);
            }
        }
        Ok(())
    }

    fn existing(&self, operation_id: &str) -> SyncResult<&QueuedOperation> {
        self.ops
            .get(operation_id)
            .ok_or_else(|| SyncError::OperationNotFound(operation_id.to_string()))
    }

    /// Clones `operation_id` after checking the transition to `to`.
    fn transition(&self, operation_id: &str, to: OperationState) -> SyncResult<QueuedOperation> {
        let op = self.existing(operation_id)?;
        if !op.state.can_transition_to(to) {
            return Err(SyncError::InvalidTransition { from: op.state, to });
        }
        let mut next = op.clone();
        next.state = to;
        Ok(next)
    }

    /// Hands claims whose outcome could not be recorded back to `PENDING`.
    ///
    /// Memory only: the journal still holds them as `IN_PROGRESS`, which a
    /// reopen recovers the same way.
    fn release(&mut self, operation_ids: &[String]) {
        for id in operation_ids {
            if let Some(op) = self.ops.get_mut(id) {
                if op.state == OperationState::InProgress {
                    op.state = OperationState::Pending;
                }
            }
        }
    }

    fn compact(&mut self) -> SyncResult<()> {
        let Some(journal) = self.journal.as_mut() else {
            return Ok(());
        };
        let mut ops: Vec<&QueuedOperation> = self.ops.values().collect();
        ops.sort_by_key(|op| op.sequence);
        let encoded = ops
            .into_iter()
            .map(|op| to_cbor(&QueueRecord::Put(vec![op.clone()])))
            .collect::<Result<Vec<_>, _>>()?;
        journal.rewrite(encoded.iter().map(Vec::as_slice))?;
        Ok(())
    }
}

/// Durable, priority-ordered outbox of unacknowledged mutations.
pub struct OfflineOperationQueue {
    inner: Mutex<QueueInner>,
    default_max_retries: AtomicU32,
    observer: Arc<dyn SyncObserver>,
}

impl fmt::Debug for OfflineOperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OfflineOperationQueue")
            .field("operations", &inner.ops.len())
            .field("durable", &inner.journal.is_some())
            .field("default_max_retries", &self.default_max_retries())
            .finish()
    }
}

impl OfflineOperationQueue {
    /// Creates a queue that lives only in memory.
    pub fn in_memory() -> Self {
        Self::from_parts(HashMap::new(), 0, None)
    }

    /// Opens a journal-backed queue, replaying its history.
    ///
    /// Operations left `IN_PROGRESS` by a crash return to `PENDING`.
    pub fn open(backend: Box<dyn StorageBackend>) -> SyncResult<Self> {
        let (journal, recovery) = Journal::open(backend)?;

        let mut ops = HashMap::new();
        for bytes in &recovery.records {
            match from_cbor::<QueueRecord>(bytes)? {
                QueueRecord::Put(batch) => {
                    for op in batch {
                        ops.insert(op.operation_id.clone(), op);
                    }
                }
                QueueRecord::Delete(ids) => {
                    for id in ids {
                        ops.remove(&id);
                    }
                }
            }
        }
        let next_sequence = ops.values().map(|op| op.sequence + 1).max().unwrap_or(0);
        tracing::debug!(
            records = recovery.records.len(),
            operations = ops.len(),
            "operation queue replayed"
        );

        let queue = Self::from_parts(ops, next_sequence, Some(journal));
        let recovered = queue.recover_in_progress()?;
        if recovered > 0 {
            tracing::info!(recovered, "requeued operations interrupted mid-drain");
        }
        Ok(queue)
    }

    /// Opens a file-backed queue at `path`.
    pub fn open_file(path: &Path) -> SyncResult<Self> {
        Self::open(Box::new(FileBackend::open(path)?))
    }

    fn from_parts(
        ops: HashMap<String, QueuedOperation>,
        next_sequence: u64,
        journal: Option<Journal>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ops,
                next_sequence,
                journal,
            }),
            default_max_retries: AtomicU32::new(DEFAULT_MAX_RETRIES),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Sets the retry budget for newly enqueued operations.
    #[must_use]
    pub fn with_default_max_retries(self, retries: u32) -> Self {
        self.set_default_max_retries(retries);
        self
    }

    /// Changes the retry budget for operations enqueued from now on.
    pub fn set_default_max_retries(&self, retries: u32) {
        self.default_max_retries.store(retries, Ordering::Relaxed);
    }

    /// Retry budget given to newly enqueued operations.
    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries.load(Ordering::Relaxed)
    }

    /// Routes terminal failures to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Queues a mutation and returns its operation id.
    ///
    /// Without an explicit `priority` the class comes from the entity type.
    pub fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation_type: OperationType,
        payload: Vec<u8>,
        priority: Option<SyncPriority>,
        now: Timestamp,
    ) -> SyncResult<String> {
        let priority = priority.unwrap_or_else(|| SyncPriority::for_entity_type(entity_type));
        let operation_id = uuid::Uuid::new_v4().to_string();

        let mut inner = self.inner.lock();
        let mut op = QueuedOperation::new(
            operation_id.clone(),
            entity_type,
            entity_id,
            operation_type,
            payload,
            priority,
            now,
            inner.next_sequence,
        );
        op.max_retries = self.default_max_retries();
        inner.commit(vec![op])?;
        inner.next_sequence += 1;

        tracing::debug!(
            operation_id = %operation_id,
            entity_type,
            entity_id,
            %priority,
            "operation enqueued"
        );
        Ok(operation_id)
    }

    /// Queues a snapshot of `record`.
    pub fn enqueue_record(
        &self,
        record: &EntityRecord,
        operation_type: OperationType,
        now: Timestamp,
    ) -> SyncResult<String> {
        let payload = encode_payload(record)?;
        self.enqueue(
            &record.entity_type,
            &record.entity_id,
            operation_type,
            payload,
            None,
            now,
        )
    }

    /// Claims up to `batch_size` operations, most urgent first, FIFO within
    /// a priority class, and marks them `IN_PROGRESS`.
    pub fn claim_pending(
        &self,
        batch_size: usize,
        now: Timestamp,
    ) -> SyncResult<Vec<QueuedOperation>> {
        let mut inner = self.inner.lock();

        let mut claimable: Vec<&QueuedOperation> =
            inner.ops.values().filter(|op| op.is_claimable()).collect();
        claimable.sort_by_key(|op| op.drain_order());

        let claimed: Vec<QueuedOperation> = claimable
            .into_iter()
            .take(batch_size)
            .map(|op| {
                let mut next = op.clone();
                next.state = OperationState::InProgress;
                next.last_attempt_at = Some(now);
                next
            })
            .collect();

        inner.commit(claimed.clone())?;
        Ok(claimed)
    }

    /// Marks a claimed operation as acknowledged.
    pub fn complete(&self, operation_id: &str, now: Timestamp) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let mut op = inner.transition(operation_id, OperationState::Completed)?;
        op.completed_at = Some(now);
        op.error_message = None;
        inner.commit(vec![op])
    }

    /// Records a failed attempt on a claimed operation.
    ///
    /// The operation stays claimable while `retry_count < max_retries`.
    pub fn fail(
        &self,
        operation_id: &str,
        error: &str,
        now: Timestamp,
    ) -> SyncResult<QueuedOperation> {
        let op = {
            let mut inner = self.inner.lock();
            let mut op = inner.transition(operation_id, OperationState::Failed)?;
            op.retry_count += 1;
            op.last_attempt_at = Some(now);
            op.error_message = Some(error.to_string());
            inner.commit(vec![op.clone()])?;
            op
        };

        if op.is_exhausted() {
            self.observer.on_operation_failed_terminally(&op);
        } else {
            tracing::debug!(
                operation_id,
                retry_count = op.retry_count,
                max_retries = op.max_retries,
                error,
                "operation failed, will retry"
            );
        }
        Ok(op)
    }

    /// Claims a batch and runs `processor` on each operation.
    ///
    /// A processor error or panic fails that operation only; the rest of the
    /// batch still runs. Returns the number of successes.
    ///
    /// If an outcome cannot be written to the journal, that operation and
    /// the ones not yet processed go back to `PENDING` and the storage error
    /// is returned. A processor may therefore see an operation again.
    pub fn drain<F, E>(
        &self,
        batch_size: usize,
        now: Timestamp,
        mut processor: F,
    ) -> SyncResult<usize>
    where
        F: FnMut(&QueuedOperation) -> Result<(), E>,
        E: fmt::Display,
    {
        let batch = self.claim_pending(batch_size, now)?;
        let mut succeeded = 0;
        let mut unsettled = Vec::new();
        let mut first_error = None;

        for op in &batch {
            if first_error.is_some() {
                unsettled.push(op.operation_id.clone());
                continue;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor(op)));
            let recorded = match outcome {
                Ok(Ok(())) => self.complete(&op.operation_id, now).map(|()| true),
                Ok(Err(e)) => self.fail(&op.operation_id, &e.to_string(), now).map(|_| false),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.fail(&op.operation_id, &message, now).map(|_| false)
                }
            };
            match recorded {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        operation_id = %op.operation_id,
                        error = %e,
                        "could not record operation outcome"
                    );
                    unsettled.push(op.operation_id.clone());
                    first_error = Some(e);
                }
            }
        }

        if !unsettled.is_empty() {
            self.inner.lock().release(&unsettled);
        }
        if !batch.is_empty() {
            tracing::debug!(
                claimed = batch.len(),
                succeeded,
                released = unsettled.len(),
                "queue drained"
            );
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(succeeded),
        }
    }

    /// Deletes `COMPLETED` operations finished before `now - retention` and
    /// compacts the journal.
    pub fn cleanup(&self, retention: Duration, now: Timestamp) -> SyncResult<usize> {
        let cutoff = now.saturating_sub(millis(retention));
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .ops
            .values()
            .filter(|op| {
                op.state == OperationState::Completed
                    && op.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|op| op.operation_id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        inner.persist(&QueueRecord::Delete(expired.clone()))?;
        for id in &expired {
            inner.ops.remove(id);
        }
        inner.compact()?;

        tracing::info!(removed = expired.len(), "completed operations cleaned up");
        Ok(expired.len())
    }

    /// Withdraws a `PENDING` or `FAILED` operation.
    pub fn cancel(&self, operation_id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let op = inner.transition(operation_id, OperationState::Cancelled)?;
        inner.commit(vec![op])
    }

    /// Withdraws every cancellable operation on one entity.
    pub fn cancel_for_entity(&self, entity_type: &str, entity_id: &str) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let cancelled: Vec<QueuedOperation> = inner
            .ops
            .values()
            .filter(|op| {
                op.entity_type == entity_type
                    && op.entity_id == entity_id
                    && op.state.can_transition_to(OperationState::Cancelled)
            })
            .map(|op| {
                let mut next = op.clone();
                next.state = OperationState::Cancelled;
                next
            })
            .collect();
        let count = cancelled.len();
        inner.commit(cancelled)?;
        Ok(count)
    }

    /// Re-arms a `FAILED` operation with a fresh retry budget.
    pub fn retry_failed(&self, operation_id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let current = inner.existing(operation_id)?.state;
        if current != OperationState::Failed {
            return Err(SyncError::InvalidTransition {
                from: current,
                to: OperationState::Pending,
            });
        }
        let mut op = inner.transition(operation_id, OperationState::Pending)?;
        op.retry_count = 0;
        op.error_message = None;
        inner.commit(vec![op])
    }

    /// Re-arms every operation that exhausted its retries.
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let rearmed: Vec<QueuedOperation> = inner
            .ops
            .values()
            .filter(|op| op.is_exhausted())
            .map(|op| {
                let mut next = op.clone();
                next.state = OperationState::Pending;
                next.retry_count = 0;
                next.error_message = None;
                next
            })
            .collect();
        let count = rearmed.len();
        inner.commit(rearmed)?;
        Ok(count)
    }

    /// Returns operations stuck `IN_PROGRESS` to `PENDING`.
    ///
    /// Only safe when no drain is running, e.g. right after open.
    pub fn recover_in_progress(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock();
        let recovered: Vec<QueuedOperation> = inner
            .ops
            .values()
            .filter(|op| op.state == OperationState::InProgress)
            .map(|op| {
                let mut next = op.clone();
                next.state = OperationState::Pending;
                next
            })
            .collect();
        let count = recovered.len();
        inner.commit(recovered)?;
        Ok(count)
    }

    /// Looks up one operation.
    pub fn get(&self, operation_id: &str) -> Option<QueuedOperation> {
        self.inner.lock().ops.get(operation_id).cloned()
    }

    /// Operations matching `filter`, in drain order.
    pub fn list(&self, filter: &QueueFilter) -> Vec<QueuedOperation> {
        let inner = self.inner.lock();
        let mut ops: Vec<QueuedOperation> = inner
            .ops
            .values()
            .filter(|op| filter.matches(op))
            .cloned()
            .collect();
        ops.sort_by_key(QueuedOperation::drain_order);
        ops
    }

    /// Counts by state.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for op in inner.ops.values() {
            match op.state {
                OperationState::Pending => stats.pending += 1,
                OperationState::InProgress => stats.in_progress += 1,
                OperationState::Completed => stats.completed += 1,
                OperationState::Failed if op.is_exhausted() => stats.exhausted += 1,
                OperationState::Failed => stats.failed += 1,
                OperationState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Number of operations in any state.
    pub fn len(&self) -> usize {
        self.inner.lock().ops.len()
    }

    /// Returns true if the queue holds no operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "processor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrisync_storage::InMemoryBackend;

    const T: Timestamp = 1_700_000_000_000;

    fn enqueue(
        queue: &OfflineOperationQueue,
        entity_type: &str,
        priority: SyncPriority,
        now: Timestamp,
    ) -> String {
        queue
            .enqueue(entity_type, "e-1", OperationType::Update, Vec::new(), Some(priority), now)
            .unwrap()
    }

    #[test]
    fn claim_orders_by_priority_then_fifo() {
        let queue = OfflineOperationQueue::in_memory();
        let low = enqueue(&queue, "dashboard", SyncPriority::Low, T);
        let normal = enqueue(&queue, "user", SyncPriority::Normal, T + 1);
        let high = enqueue(&queue, "product", SyncPriority::High, T + 2);

        let claimed = queue.claim_pending(3, T + 10).unwrap();
        let ids: Vec<_> = claimed.iter().map(|op| op.operation_id.clone()).collect();
        assert_eq!(ids, vec![high, normal, low]);
        assert!(claimed.iter().all(|op| op.state == OperationState::InProgress));
        assert!(queue.claim_pending(3, T + 10).unwrap().is_empty());
    }

    #[test]
    fn same_timestamp_keeps_insertion_order() {
        let queue = OfflineOperationQueue::in_memory();
        let first = enqueue(&queue, "order", SyncPriority::Critical, T);
        let second = enqueue(&queue, "order", SyncPriority::Critical, T);
        let claimed = queue.claim_pending(1, T).unwrap();
        assert_eq!(claimed[0].operation_id, first);
        assert_eq!(queue.claim_pending(1, T).unwrap()[0].operation_id, second);
    }

    #[test]
    fn default_priority_comes_from_entity_type() {
        let queue = OfflineOperationQueue::in_memory();
        let id = queue
            .enqueue("payment", "p", OperationType::Create, Vec::new(), None, T)
            .unwrap();
        assert_eq!(queue.get(&id).unwrap().priority, SyncPriority::Critical);
    }

    #[test]
    fn fail_then_succeed_across_drains() {
        let queue = OfflineOperationQueue::in_memory();
        let id = enqueue(&queue, "order", SyncPriority::Critical, T);
        let mut attempts = 0;

        let mut processor = |_: &QueuedOperation| -> Result<(), String> {
            attempts += 1;
            if attempts == 1 {
                Err("gateway unavailable".into())
            } else {
                Ok(())
            }
        };

        assert_eq!(queue.drain(10, T, &mut processor).unwrap(), 0);
        let op = queue.get(&id).unwrap();
        assert_eq!(op.state, OperationState::Failed);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.error_message.as_deref(), Some("gateway unavailable"));

        assert_eq!(queue.drain(10, T + 1, &mut processor).unwrap(), 1);
        let op = queue.get(&id).unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert_eq!(op.completed_at, Some(T + 1));
    }

    #[test]
    fn panicking_processor_fails_only_its_operation() {
        let queue = OfflineOperationQueue::in_memory();
        let bad = enqueue(&queue, "order", SyncPriority::Critical, T);
        let good = enqueue(&queue, "order", SyncPriority::Critical, T + 1);

        let succeeded = queue
            .drain(10, T, |op: &QueuedOperation| -> Result<(), String> {
                if op.operation_id == bad {
                    panic!("malformed payload");
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(succeeded, 1);
        let failed = queue.get(&bad).unwrap();
        assert_eq!(failed.state, OperationState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("malformed payload"));
        assert_eq!(queue.get(&good).unwrap().state, OperationState::Completed);
    }

    #[test]
    fn exhausted_operation_stays_failed() {
        let queue = OfflineOperationQueue::in_memory().with_default_max_retries(2);
        let id = enqueue(&queue, "transfer", SyncPriority::Critical, T);

        for i in 0..4 {
            queue
                .drain(10, T + i, |_: &QueuedOperation| Err::<(), _>("rejected"))
                .unwrap();
        }

        let op = queue.get(&id).unwrap();
        assert_eq!(op.retry_count, 2);
        assert!(op.is_exhausted());
        assert_eq!(queue.stats().exhausted, 1);

        queue.retry_failed(&id).unwrap();
        let op = queue.get(&id).unwrap();
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.retry_count, 0);
    }

    #[test]
    fn transitions_are_checked() {
        let queue = OfflineOperationQueue::in_memory();
        let id = enqueue(&queue, "order", SyncPriority::Critical, T);

        assert!(matches!(
            queue.complete(&id, T),
            Err(SyncError::InvalidTransition { from: OperationState::Pending, .. })
        ));
        assert!(matches!(
            queue.complete("missing", T),
            Err(SyncError::OperationNotFound(_))
        ));
        assert!(queue.retry_failed(&id).is_err());

        queue.cancel(&id).unwrap();
        assert!(queue.claim_pending(10, T).unwrap().is_empty());
        assert!(queue.cancel(&id).is_err());
    }

    #[test]
    fn cancel_for_entity_skips_claimed_and_finished() {
        let queue = OfflineOperationQueue::in_memory();
        let claimed = enqueue(&queue, "order", SyncPriority::Critical, T);
        queue.claim_pending(1, T).unwrap();
        enqueue(&queue, "order", SyncPriority::Critical, T + 1);
        enqueue(&queue, "order", SyncPriority::Critical, T + 2);

        assert_eq!(queue.cancel_for_entity("order", "e-1").unwrap(), 2);
        assert_eq!(queue.get(&claimed).unwrap().state, OperationState::InProgress);
        assert_eq!(queue.stats().cancelled, 2);
    }

    #[test]
    fn cleanup_removes_old_completed_only() {
        let queue = OfflineOperationQueue::in_memory();
        let old = enqueue(&queue, "order", SyncPriority::Critical, T);
        let recent = enqueue(&queue, "order", SyncPriority::Critical, T);
        let pending = enqueue(&queue, "order", SyncPriority::Critical, T);
        queue.claim_pending(2, T).unwrap();
        queue.complete(&old, T).unwrap();
        queue.complete(&recent, T + millis(Duration::from_secs(3 * 86_400))).unwrap();

        let now = T + millis(Duration::from_secs(8 * 86_400));
        assert_eq!(queue.cleanup(Duration::from_secs(7 * 86_400), now).unwrap(), 1);
        assert!(queue.get(&old).is_none());
        assert!(queue.get(&recent).is_some());
        assert!(queue.get(&pending).is_some());
    }

    #[test]
    fn journal_replay_restores_state_and_requeues_claims() {
        let backend = InMemoryBackend::new();
        let (done, claimed, waiting) = {
            let queue = OfflineOperationQueue::open(Box::new(backend.clone())).unwrap();
            let done = enqueue(&queue, "order", SyncPriority::Critical, T);
            let claimed = enqueue(&queue, "product", SyncPriority::High, T);
            let waiting = enqueue(&queue, "settings", SyncPriority::Background, T);
            queue.claim_pending(2, T).unwrap();
            queue.complete(&done, T).unwrap();
            (done, claimed, waiting)
        };

        let queue = OfflineOperationQueue::open(Box::new(backend.clone())).unwrap();
        assert_eq!(queue.get(&done).unwrap().state, OperationState::Completed);
        assert_eq!(queue.get(&claimed).unwrap().state, OperationState::Pending);
        assert_eq!(queue.get(&waiting).unwrap().state, OperationState::Pending);

        let next = enqueue(&queue, "settings", SyncPriority::Background, T);
        assert!(queue.get(&next).unwrap().sequence > queue.get(&waiting).unwrap().sequence);
    }

    #[test]
    fn cleanup_compacts_journal() {
        let backend = InMemoryBackend::new();
        let queue = OfflineOperationQueue::open(Box::new(backend.clone())).unwrap();
        for i in 0..20 {
            enqueue(&queue, "chat_message", SyncPriority::High, T + i);
        }
        queue.drain(20, T, |_: &QueuedOperation| Ok::<(), String>(())).unwrap();
        let keep = enqueue(&queue, "chat_message", SyncPriority::High, T + 100);
        let before = backend.size().unwrap();

        assert_eq!(queue.cleanup(Duration::ZERO, T + 1).unwrap(), 20);
        assert!(backend.size().unwrap() < before);

        let reopened = OfflineOperationQueue::open(Box::new(backend)).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(&keep).is_some());
    }

    #[test]
    fn failed_journal_write_leaves_memory_untouched() {
        let backend = InMemoryBackend::new();
        let queue = OfflineOperationQueue::open(Box::new(backend.clone())).unwrap();
        let id = enqueue(&queue, "order", SyncPriority::Critical, T);

        backend.set_read_only(true);
        assert!(queue.claim_pending(1, T).is_err());
        assert_eq!(queue.get(&id).unwrap().state, OperationState::Pending);

        backend.set_read_only(false);
        assert_eq!(queue.claim_pending(1, T).unwrap().len(), 1);
    }

    #[test]
    fn list_filters_and_payload_snapshot() {
        let queue = OfflineOperationQueue::in_memory();
        let record = EntityRecord::new("listing", "l-1", T).with_field("title", "Goats");
        let id = queue.enqueue_record(&record, OperationType::Create, T).unwrap();
        enqueue(&queue, "order", SyncPriority::Critical, T);

        let filter = QueueFilter {
            entity_type: Some("listing".into()),
            ..QueueFilter::default()
        };
        let listed = queue.list(&filter);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].operation_id, id);
        assert_eq!(listed[0].record().unwrap(), record);

        let all = queue.list(&QueueFilter::default());
        assert_eq!(all[0].entity_type, "order");
    }
}
