//! Observability hooks.
//!
//! The engine reports notable events through an injected [`SyncObserver`]
//! instead of a global logger, so hosts can forward them to crash
//! reporting or analytics.

use crate::orchestrator::SyncStats;
use crate::scheduler::WorkRequest;
use agrisync_protocol::{EntityKey, QueuedOperation};
use parking_lot::Mutex;

/// Receives engine events. Every method defaults to a no-op.
pub trait SyncObserver: Send + Sync {
    /// A domain finished its cycle and its watermark was written.
    fn on_domain_synced(&self, _domain: &str, _pulled: u64, _pushed: u64, _watermark: i64) {}

    /// A domain failed; its watermark is untouched.
    fn on_domain_failed(&self, _domain: &str, _error: &str) {}

    /// A conflict needs a user decision.
    fn on_conflict_escalated(&self, _key: &EntityKey, _fields: &[String]) {}

    /// A queued operation exhausted its retries.
    fn on_operation_failed_terminally(&self, _operation: &QueuedOperation) {}

    /// Scheduled work exhausted its attempts.
    fn on_work_failed(&self, _request: &WorkRequest, _error: &str) {}

    /// A pass finished.
    fn on_pass_completed(&self, _stats: &SyncStats) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_domain_synced(&self, domain: &str, pulled: u64, pushed: u64, watermark: i64) {
        tracing::info!(domain, pulled, pushed, watermark, "domain synced");
    }

    fn on_domain_failed(&self, domain: &str, error: &str) {
        tracing::warn!(domain, error, "domain sync failed");
    }

    fn on_conflict_escalated(&self, key: &EntityKey, fields: &[String]) {
        tracing::warn!(entity = %key, ?fields, "conflict needs user input");
    }

    fn on_operation_failed_terminally(&self, operation: &QueuedOperation) {
        tracing::error!(
            operation_id = %operation.operation_id,
            entity_type = %operation.entity_type,
            entity_id = %operation.entity_id,
            retries = operation.retry_count,
            error = operation.error_message.as_deref().unwrap_or(""),
            "queued operation failed permanently"
        );
    }

    fn on_work_failed(&self, request: &WorkRequest, error: &str) {
        tracing::error!(
            tag = %request.tag,
            domain = %request.domain,
            attempts = request.attempt,
            error,
            "scheduled sync gave up"
        );
    }

    fn on_pass_completed(&self, stats: &SyncStats) {
        tracing::info!(
            pulled = stats.pulled,
            pushed = stats.pushed,
            conflicts_resolved = stats.conflicts_resolved,
            conflicts_escalated = stats.conflicts_escalated,
            purged = stats.purged,
            failed = stats.failed_domains.len(),
            cancelled = stats.cancelled,
            "sync pass completed"
        );
    }
}

/// An event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    /// See [`SyncObserver::on_domain_synced`].
    DomainSynced {
        /// Domain name.
        domain: String,
        /// New watermark.
        watermark: i64,
    },
    /// See [`SyncObserver::on_domain_failed`].
    DomainFailed {
        /// Domain name.
        domain: String,
        /// Error text.
        error: String,
    },
    /// See [`SyncObserver::on_conflict_escalated`].
    ConflictEscalated {
        /// Conflicting entity.
        key: EntityKey,
        /// Differing fields.
        fields: Vec<String>,
    },
    /// See [`SyncObserver::on_operation_failed_terminally`].
    OperationFailed {
        /// Operation id.
        operation_id: String,
    },
    /// See [`SyncObserver::on_work_failed`].
    WorkFailed {
        /// Work tag.
        tag: String,
    },
    /// See [`SyncObserver::on_pass_completed`].
    PassCompleted(SyncStats),
}

/// Captures events in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far, in order.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().clone()
    }

    /// Clears captured events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: ObservedEvent) {
        self.events.lock().push(event);
    }
}

impl SyncObserver for RecordingObserver {
    fn on_domain_synced(&self, domain: &str, _pulled: u64, _pushed: u64, watermark: i64) {
        self.push(ObservedEvent::DomainSynced {
            domain: domain.to_string(),
            watermark,
        });
    }

    fn on_domain_failed(&self, domain: &str, error: &str) {
        self.push(ObservedEvent::DomainFailed {
            domain: domain.to_string(),
            error: error.to_string(),
        });
    }

    fn on_conflict_escalated(&self, key: &EntityKey, fields: &[String]) {
        self.push(ObservedEvent::ConflictEscalated {
            key: key.clone(),
            fields: fields.to_vec(),
        });
    }

    fn on_operation_failed_terminally(&self, operation: &QueuedOperation) {
        self.push(ObservedEvent::OperationFailed {
            operation_id: operation.operation_id.clone(),
        });
    }

    fn on_work_failed(&self, request: &WorkRequest, _error: &str) {
        self.push(ObservedEvent::WorkFailed {
            tag: request.tag.clone(),
        });
    }

    fn on_pass_completed(&self, stats: &SyncStats) {
        self.push(ObservedEvent::PassCompleted(stats.clone()));
    }
}
