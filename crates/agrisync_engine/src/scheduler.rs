//! Deferred, constrained sync work.
//!
//! The host runs sync as bounded background tasks rather than a
//! long-lived thread. A [`TaskScheduler`] holds [`WorkRequest`]s, each
//! with execution constraints, an earliest start time and a backoff
//! policy. [`PrioritySyncManager`] maps entity types to priority classes
//! and turns them into work requests for the [`SyncOrchestrator`].

use crate::config::{millis, SchedulingPolicy};
use crate::device::{Constraints, DeviceConditions};
use crate::error::{SyncError, SyncResult};
use crate::observer::{SyncObserver, TracingObserver};
use crate::orchestrator::{DomainFailure, SyncOrchestrator, SyncStats};
use crate::queue::OfflineOperationQueue;
use agrisync_protocol::{QueuedOperation, SyncPriority, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A unit of deferred sync work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    /// Unique tag. Scheduling a request with an existing tag replaces it.
    pub tag: String,
    /// Domain to sync.
    pub domain: String,
    /// Entity that triggered the work, if any.
    pub entity_id: Option<String>,
    /// Priority class.
    pub priority: SyncPriority,
    /// Execution preconditions.
    pub constraints: Constraints,
    /// Earliest start time.
    pub not_before: Timestamp,
    /// Executions so far.
    pub attempt: u32,
    /// Delay, backoff and attempt limits.
    pub policy: SchedulingPolicy,
}

impl WorkRequest {
    /// Tag for entity-level work: `sync:{type}:{id}`.
    pub fn entity_tag(entity_type: &str, entity_id: &str) -> String {
        format!("sync:{entity_type}:{entity_id}")
    }

    /// Work for one entity, delayed by the policy's initial delay.
    pub fn for_entity(
        entity_type: &str,
        entity_id: &str,
        priority: SyncPriority,
        policy: SchedulingPolicy,
        now: Timestamp,
    ) -> Self {
        Self {
            tag: Self::entity_tag(entity_type, entity_id),
            domain: entity_type.to_string(),
            entity_id: Some(entity_id.to_string()),
            priority,
            constraints: policy.constraints,
            not_before: now.saturating_add(millis(policy.initial_delay)),
            attempt: 0,
            policy,
        }
    }

    /// Work for a whole domain, delayed by the policy's initial delay.
    pub fn for_domain(
        domain: &str,
        priority: SyncPriority,
        policy: SchedulingPolicy,
        now: Timestamp,
    ) -> Self {
        Self {
            tag: format!("sync:{domain}"),
            domain: domain.to_string(),
            entity_id: None,
            priority,
            constraints: policy.constraints,
            not_before: now.saturating_add(millis(policy.initial_delay)),
            attempt: 0,
            policy,
        }
    }

    /// Returns true if the request may start at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.not_before <= now
    }
}

/// Result of executing a work request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Done; the request is dropped.
    Success,
    /// Transient failure; rescheduled with backoff while attempts remain.
    Retry(String),
    /// Permanent failure; reported and dropped.
    Failure(String),
}

/// Counts from one [`ManualScheduler::run_due`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Requests that succeeded.
    pub succeeded: usize,
    /// Requests rescheduled with backoff.
    pub retried: usize,
    /// Requests reported as failed and dropped.
    pub failed: usize,
    /// Due requests whose constraints were not met.
    pub blocked: usize,
}

/// Holds deferred work.
pub trait TaskScheduler: Send + Sync {
    /// Adds `request`, replacing any request with the same tag.
    fn schedule(&self, request: WorkRequest);

    /// Removes the request tagged `tag`. Returns true if one was removed.
    fn cancel(&self, tag: &str) -> bool;

    /// Requests not yet run, most urgent first.
    fn pending(&self) -> Vec<WorkRequest>;
}

/// A deterministic scheduler driven by the host.
///
/// Nothing runs until the host calls [`run_due`](Self::run_due), which
/// makes the scheduler usable from a platform job callback and from tests.
pub struct ManualScheduler {
    requests: Mutex<BTreeMap<String, WorkRequest>>,
    observer: Arc<dyn SyncObserver>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(BTreeMap::new()),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Reports work that ran out of attempts to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runs every due request whose constraints `conditions` satisfy.
    ///
    /// Requests run most urgent first, outside the scheduler lock, so an
    /// executor may schedule or cancel work. A retried request is
    /// reinserted unless the executor rescheduled its tag meanwhile.
    pub fn run_due<F>(
        &self,
        now: Timestamp,
        conditions: &DeviceConditions,
        mut executor: F,
    ) -> RunReport
    where
        F: FnMut(&WorkRequest) -> WorkOutcome,
    {
        let mut report = RunReport::default();
        let mut due: Vec<WorkRequest> = {
            let mut requests = self.requests.lock();
            let tags: Vec<String> = requests
                .values()
                .filter(|r| r.is_due(now))
                .filter(|r| {
                    let ok = r.constraints.satisfied_by(conditions);
                    if !ok {
                        report.blocked += 1;
                    }
                    ok
                })
                .map(|r| r.tag.clone())
                .collect();
            tags.iter().filter_map(|t| requests.remove(t)).collect()
        };
        due.sort_by(|a, b| {
            (a.priority, a.not_before, &a.tag).cmp(&(b.priority, b.not_before, &b.tag))
        });

        for request in due {
            match executor(&request) {
                WorkOutcome::Success => report.succeeded += 1,
                WorkOutcome::Retry(reason) => {
                    let runs = request.attempt + 1;
                    if runs >= request.policy.max_attempts {
                        self.give_up(&request, &reason);
                        report.failed += 1;
                        continue;
                    }
                    let mut next = request;
                    next.attempt = runs;
                    next.not_before = now.saturating_add(millis(next.policy.backoff_for(runs)));
                    tracing::debug!(
                        tag = %next.tag,
                        attempt = runs,
                        not_before = next.not_before,
                        error = %reason,
                        "work rescheduled"
                    );
                    self.requests.lock().entry(next.tag.clone()).or_insert(next);
                    report.retried += 1;
                }
                WorkOutcome::Failure(reason) => {
                    self.give_up(&request, &reason);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Earliest start time among pending requests.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.requests.lock().values().map(|r| r.not_before).min()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn give_up(&self, request: &WorkRequest, reason: &str) {
        tracing::warn!(
            tag = %request.tag,
            attempts = request.attempt + 1,
            error = reason,
            "work failed"
        );
        self.observer.on_work_failed(request, reason);
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.len())
            .finish()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, request: WorkRequest) {
        tracing::debug!(
            tag = %request.tag,
            priority = %request.priority,
            not_before = request.not_before,
            "work scheduled"
        );
        self.requests.lock().insert(request.tag.clone(), request);
    }

    fn cancel(&self, tag: &str) -> bool {
        self.requests.lock().remove(tag).is_some()
    }

    fn pending(&self) -> Vec<WorkRequest> {
        let mut pending: Vec<WorkRequest> = self.requests.lock().values().cloned().collect();
        pending.sort_by(|a, b| (a.priority, a.not_before).cmp(&(b.priority, b.not_before)));
        pending
    }
}

impl<S: TaskScheduler + ?Sized> TaskScheduler for Arc<S> {
    fn schedule(&self, request: WorkRequest) {
        (**self).schedule(request)
    }

    fn cancel(&self, tag: &str) -> bool {
        (**self).cancel(tag)
    }

    fn pending(&self) -> Vec<WorkRequest> {
        (**self).pending()
    }
}

/// Priority-aware scheduling over the orchestrator and the offline queue.
pub struct PrioritySyncManager<S: TaskScheduler = ManualScheduler> {
    orchestrator: Arc<SyncOrchestrator>,
    queue: Arc<OfflineOperationQueue>,
    scheduler: S,
    policies: HashMap<SyncPriority, SchedulingPolicy>,
}

impl<S: TaskScheduler> PrioritySyncManager<S> {
    /// Creates a manager with the default policy for every class.
    ///
    /// New queue operations get the orchestrator's configured retry budget.
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        queue: Arc<OfflineOperationQueue>,
        scheduler: S,
    ) -> Self {
        queue.set_default_max_retries(orchestrator.config().default_max_retries);
        let policies = SyncPriority::ALL
            .iter()
            .map(|p| (*p, SchedulingPolicy::for_priority(*p)))
            .collect();
        Self {
            orchestrator,
            queue,
            scheduler,
            policies,
        }
    }

    /// Overrides the policy for one class.
    #[must_use]
    pub fn with_policy(mut self, priority: SyncPriority, policy: SchedulingPolicy) -> Self {
        self.policies.insert(priority, policy);
        self
    }

    /// Policy for a class.
    pub fn policy_for(&self, priority: SyncPriority) -> SchedulingPolicy {
        self.policies
            .get(&priority)
            .copied()
            .unwrap_or_else(|| SchedulingPolicy::for_priority(priority))
    }

    /// The orchestrator.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// The offline queue.
    pub fn queue(&self) -> &Arc<OfflineOperationQueue> {
        &self.queue
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Schedules a deferred sync of the entity's domain.
    ///
    /// `priority` defaults to the entity type's class. Rescheduling the
    /// same entity replaces the earlier request.
    pub fn schedule_sync_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        priority: Option<SyncPriority>,
        now: Timestamp,
    ) -> SyncResult<WorkRequest> {
        if self.orchestrator.registry().get(entity_type).is_none() {
            return Err(SyncError::UnknownDomain(entity_type.to_string()));
        }
        let priority = priority.unwrap_or_else(|| SyncPriority::for_entity_type(entity_type));
        let request = WorkRequest::for_entity(
            entity_type,
            entity_id,
            priority,
            self.policy_for(priority),
            now,
        );
        self.scheduler.schedule(request.clone());
        Ok(request)
    }

    /// Syncs every critical domain now, ignoring delays and constraints.
    ///
    /// Failures are collected in the returned stats, as in
    /// [`SyncOrchestrator::sync_all`].
    pub fn force_critical_sync(&self, now: Timestamp) -> SyncResult<SyncStats> {
        if !self.orchestrator.device().is_online() {
            tracing::info!("device offline, critical sync skipped");
            return Ok(SyncStats {
                offline: true,
                ..SyncStats::default()
            });
        }

        let critical: Vec<String> = self
            .orchestrator
            .registry()
            .iter()
            .filter(|d| d.priority == SyncPriority::Critical)
            .map(|d| d.name.clone())
            .collect();

        let mut stats = SyncStats::default();
        for domain in critical {
            match self.orchestrator.sync_domain(&domain, now) {
                Ok(domain_stats) => stats.merge(domain_stats),
                Err(SyncError::AlreadyRunning) => {
                    tracing::debug!(%domain, "pass running, critical sync skipped");
                    stats.skipped = true;
                    break;
                }
                Err(e) => stats.failed_domains.push(DomainFailure {
                    domain,
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                }),
            }
        }
        Ok(stats)
    }

    /// Cancels scheduled work and queued operations for one entity.
    ///
    /// Returns true if anything was cancelled.
    pub fn cancel_sync_for_entity(&self, entity_type: &str, entity_id: &str) -> SyncResult<bool> {
        let unscheduled = self
            .scheduler
            .cancel(&WorkRequest::entity_tag(entity_type, entity_id));
        let cancelled = self.queue.cancel_for_entity(entity_type, entity_id)?;
        tracing::debug!(entity_type, entity_id, unscheduled, cancelled, "entity sync cancelled");
        Ok(unscheduled || cancelled > 0)
    }

    /// Drains the offline queue if the device is online.
    ///
    /// Returns the number of operations processed successfully.
    pub fn drain_queue<F, E>(
        &self,
        batch_size: usize,
        now: Timestamp,
        processor: F,
    ) -> SyncResult<usize>
    where
        F: FnMut(&QueuedOperation) -> Result<(), E>,
        E: fmt::Display,
    {
        if !self.orchestrator.device().is_online() {
            return Ok(0);
        }
        let drained = self.queue.drain(batch_size, now, processor)?;
        if let Err(e) = self.cleanup_queue(now) {
            tracing::warn!(error = %e, "queue cleanup after drain failed");
        }
        Ok(drained)
    }

    /// Deletes completed operations older than the configured retention.
    pub fn cleanup_queue(&self, now: Timestamp) -> SyncResult<usize> {
        self.queue.cleanup(self.orchestrator.config().queue_retention, now)
    }

    fn execute(&self, request: &WorkRequest, now: Timestamp) -> WorkOutcome {
        match self.orchestrator.sync_domain(&request.domain, now) {
            Ok(_) => WorkOutcome::Success,
            Err(e) if e.is_retryable() => WorkOutcome::Retry(e.to_string()),
            Err(e) => WorkOutcome::Failure(e.to_string()),
        }
    }
}

impl<S: TaskScheduler + AsRef<ManualScheduler>> PrioritySyncManager<S> {
    /// Runs due work against current device conditions.
    pub fn run_due(&self, now: Timestamp) -> RunReport {
        let conditions = self.orchestrator.device().conditions();
        self.scheduler
            .as_ref()
            .run_due(now, &conditions, |request| self.execute(request, now))
    }
}

impl AsRef<ManualScheduler> for ManualScheduler {
    fn as_ref(&self) -> &ManualScheduler {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::device::{NetworkState, StaticDeviceMonitor};
    use crate::gateway::MockGateway;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use crate::orchestrator::{DomainDescriptor, DomainRegistry};
    use crate::state::MemorySyncStateStore;
    use crate::store::MemoryLocalStore;
    use agrisync_protocol::{EntityRecord, OperationState, OperationType};
    use std::time::Duration;

    const MINUTE: Timestamp = 60_000;

    fn request(tag: &str, priority: SyncPriority, not_before: Timestamp) -> WorkRequest {
        let policy = SchedulingPolicy::for_priority(priority);
        WorkRequest {
            tag: tag.to_string(),
            domain: "product".to_string(),
            entity_id: None,
            priority,
            constraints: policy.constraints,
            not_before,
            attempt: 0,
            policy,
        }
    }

    #[test]
    fn entity_request_uses_class_delay() {
        let policy = SchedulingPolicy::for_priority(SyncPriority::Normal);
        let r = WorkRequest::for_entity("user", "u-1", SyncPriority::Normal, policy, 1_000);
        assert_eq!(r.tag, "sync:user:u-1");
        assert_eq!(r.not_before, 1_000 + 5 * MINUTE);
        assert!(r.constraints.battery_not_low);
    }

    #[test]
    fn schedule_replaces_same_tag() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(request("a", SyncPriority::High, 10));
        scheduler.schedule(request("a", SyncPriority::Low, 20));
        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, SyncPriority::Low);
    }

    #[test]
    fn run_due_skips_future_and_blocked_work() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(request("later", SyncPriority::High, 100));
        scheduler.schedule(request("wifi-only", SyncPriority::Low, 0));
        scheduler.schedule(request("now", SyncPriority::High, 0));

        let mut ran = Vec::new();
        let report = scheduler.run_due(50, &DeviceConditions::metered(), |r| {
            ran.push(r.tag.clone());
            WorkOutcome::Success
        });

        assert_eq!(ran, vec!["now".to_string()]);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.next_due(), Some(0));
    }

    #[test]
    fn run_due_orders_by_priority() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(request("low", SyncPriority::Low, 0));
        scheduler.schedule(request("critical", SyncPriority::Critical, 5));
        scheduler.schedule(request("normal", SyncPriority::Normal, 0));

        let mut ran = Vec::new();
        scheduler.run_due(10, &DeviceConditions::online(), |r| {
            ran.push(r.tag.clone());
            WorkOutcome::Success
        });
        assert_eq!(ran, vec!["critical", "normal", "low"]);
    }

    #[test]
    fn retry_backs_off_then_gives_up() {
        let observer = Arc::new(RecordingObserver::new());
        let scheduler = ManualScheduler::new().with_observer(observer.clone());
        let mut r = request("flaky", SyncPriority::Background, 0);
        r.policy.max_attempts = 2;
        scheduler.schedule(r);

        let report = scheduler.run_due(0, &DeviceConditions::online(), |_| {
            WorkOutcome::Retry("reset".into())
        });
        assert_eq!(report.retried, 1);
        let pending = scheduler.pending();
        assert_eq!(pending[0].attempt, 1);
        assert_eq!(pending[0].not_before, 10_000);

        let report = scheduler.run_due(10_000, &DeviceConditions::online(), |_| {
            WorkOutcome::Retry("reset".into())
        });
        assert_eq!(report.failed, 1);
        assert!(scheduler.is_empty());
        assert_eq!(
            observer.events(),
            vec![ObservedEvent::WorkFailed {
                tag: "flaky".to_string()
            }]
        );
    }

    #[test]
    fn failure_is_reported_immediately() {
        let observer = Arc::new(RecordingObserver::new());
        let scheduler = ManualScheduler::new().with_observer(observer.clone());
        scheduler.schedule(request("bad", SyncPriority::High, 0));

        let report = scheduler.run_due(0, &DeviceConditions::online(), |_| {
            WorkOutcome::Failure("forbidden".into())
        });
        assert_eq!(report.failed, 1);
        assert!(scheduler.is_empty());
        assert_eq!(observer.events().len(), 1);
    }

    #[test]
    fn rescheduled_tag_wins_over_retry() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(request("a", SyncPriority::High, 0));

        scheduler.run_due(0, &DeviceConditions::online(), |r| {
            scheduler.schedule(request(&r.tag, SyncPriority::Critical, 500));
            WorkOutcome::Retry("busy".into())
        });

        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, SyncPriority::Critical);
        assert_eq!(pending[0].attempt, 0);
    }

    #[test]
    fn cancel_removes_request() {
        let scheduler = ManualScheduler::new();
        scheduler.schedule(request("a", SyncPriority::High, 0));
        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
    }

    struct Fixture {
        gateway: Arc<MockGateway>,
        device: Arc<StaticDeviceMonitor>,
        manager: PrioritySyncManager,
    }

    fn fixture(domains: &[&str]) -> Fixture {
        fixture_with(SyncConfig::new("device-1"), domains)
    }

    fn fixture_with(config: SyncConfig, domains: &[&str]) -> Fixture {
        let store = Arc::new(MemoryLocalStore::new());
        let gateway = Arc::new(MockGateway::new());
        let device = Arc::new(StaticDeviceMonitor::default());
        let mut registry = DomainRegistry::new();
        for name in domains {
            registry.register(DomainDescriptor::new(*name, store.clone(), gateway.clone()));
        }
        let orchestrator = SyncOrchestrator::new(
            config,
            registry,
            Arc::new(MemorySyncStateStore::default()),
        )
        .with_device_monitor(device.clone());
        let manager = PrioritySyncManager::new(
            Arc::new(orchestrator),
            Arc::new(OfflineOperationQueue::in_memory()),
            ManualScheduler::new(),
        );
        Fixture {
            gateway,
            device,
            manager,
        }
    }

    #[test]
    fn scheduled_entity_sync_runs_after_its_delay() {
        let fx = fixture(&["product"]);
        let request = fx
            .manager
            .schedule_sync_for_entity("product", "p-1", None, 0)
            .unwrap();
        assert_eq!(request.priority, SyncPriority::High);
        assert_eq!(request.not_before, 30_000);

        assert_eq!(fx.manager.run_due(1_000).succeeded, 0);
        assert!(fx.gateway.fetch_calls().is_empty());

        assert_eq!(fx.manager.run_due(30_000).succeeded, 1);
        assert_eq!(fx.gateway.fetch_calls().len(), 1);
        assert!(fx.manager.scheduler().is_empty());
    }

    #[test]
    fn unknown_domain_cannot_be_scheduled() {
        let fx = fixture(&["product"]);
        assert!(matches!(
            fx.manager.schedule_sync_for_entity("order", "o", None, 0),
            Err(SyncError::UnknownDomain(_))
        ));
    }

    #[test]
    fn transient_failure_is_retried_with_backoff() {
        let fx = fixture(&["order"]);
        fx.gateway
            .queue_fetch_error("order", SyncError::transport_retryable("reset"));
        fx.manager
            .schedule_sync_for_entity("order", "o-1", None, 0)
            .unwrap();

        let report = fx.manager.run_due(0);
        assert_eq!(report.retried, 1);
        assert_eq!(fx.manager.scheduler().next_due(), Some(10_000));

        let report = fx.manager.run_due(10_000);
        assert_eq!(report.succeeded, 1);
    }

    #[test]
    fn offline_blocks_scheduled_work() {
        let fx = fixture(&["order"]);
        fx.device.set_network(NetworkState::Offline);
        fx.manager
            .schedule_sync_for_entity("order", "o-1", None, 0)
            .unwrap();

        let report = fx.manager.run_due(0);
        assert_eq!(report.blocked, 1);
        assert_eq!(fx.manager.scheduler().len(), 1);
    }

    #[test]
    fn force_critical_sync_only_touches_critical_domains() {
        let fx = fixture(&["user", "order", "payment", "product"]);
        fx.manager
            .schedule_sync_for_entity("user", "u", None, 0)
            .unwrap();

        let stats = fx.manager.force_critical_sync(0).unwrap();
        assert!(stats.is_success());

        let domains: Vec<String> = fx.gateway.fetch_calls().into_iter().map(|c| c.0).collect();
        assert_eq!(domains, vec!["order".to_string(), "payment".to_string()]);
        assert_eq!(fx.manager.scheduler().len(), 1);
    }

    #[test]
    fn force_critical_sync_offline_is_noop() {
        let fx = fixture(&["order"]);
        fx.device.set_network(NetworkState::Offline);
        let stats = fx.manager.force_critical_sync(0).unwrap();
        assert!(stats.offline);
        assert!(fx.gateway.fetch_calls().is_empty());
    }

    #[test]
    fn cancel_sync_for_entity_cancels_work_and_operations() {
        let fx = fixture(&["product"]);
        let queue = fx.manager.queue();
        let record = EntityRecord::new("product", "p-1", 10).dirty();
        let op = queue
            .enqueue_record(&record, OperationType::Update, 10)
            .unwrap();
        let other = queue
            .enqueue_record(&EntityRecord::new("product", "p-2", 10), OperationType::Update, 10)
            .unwrap();
        fx.manager
            .schedule_sync_for_entity("product", "p-1", None, 0)
            .unwrap();

        assert!(fx.manager.cancel_sync_for_entity("product", "p-1").unwrap());
        assert!(fx.manager.scheduler().is_empty());
        assert_eq!(queue.get(&op).unwrap().state, OperationState::Cancelled);
        assert_eq!(queue.get(&other).unwrap().state, OperationState::Pending);

        assert!(!fx.manager.cancel_sync_for_entity("product", "p-1").unwrap());
    }

    #[test]
    fn drain_queue_waits_for_connectivity() {
        let fx = fixture(&["product"]);
        fx.manager
            .queue()
            .enqueue_record(&EntityRecord::new("product", "p", 1), OperationType::Create, 1)
            .unwrap();

        fx.device.set_network(NetworkState::Offline);
        let drained = fx
            .manager
            .drain_queue(10, 5, |_| Ok::<(), String>(()))
            .unwrap();
        assert_eq!(drained, 0);

        fx.device.set_network(NetworkState::Metered);
        let drained = fx
            .manager
            .drain_queue(10, 5, |_| Ok::<(), String>(()))
            .unwrap();
        assert_eq!(drained, 1);
    }

    #[test]
    fn queue_follows_configured_retry_budget() {
        let fx = fixture_with(
            SyncConfig::new("device-1").with_default_max_retries(1),
            &["product"],
        );
        let queue = fx.manager.queue();
        assert_eq!(queue.default_max_retries(), 1);

        let id = queue
            .enqueue_record(&EntityRecord::new("product", "p", 1), OperationType::Create, 1)
            .unwrap();
        fx.manager
            .drain_queue(10, 5, |_| Err::<(), _>("rejected"))
            .unwrap();

        let op = queue.get(&id).unwrap();
        assert_eq!(op.max_retries, 1);
        assert!(op.is_exhausted());
    }

    #[test]
    fn drained_operations_expire_after_configured_retention() {
        let fx = fixture_with(
            SyncConfig::new("device-1").with_queue_retention(Duration::from_secs(60)),
            &["product"],
        );
        let queue = fx.manager.queue();
        let old = queue
            .enqueue_record(&EntityRecord::new("product", "old", 1), OperationType::Create, 1)
            .unwrap();
        fx.manager
            .drain_queue(10, 1_000, |_| Ok::<(), String>(()))
            .unwrap();
        assert_eq!(queue.get(&old).unwrap().state, OperationState::Completed);

        // Within the window nothing is removed.
        assert_eq!(fx.manager.cleanup_queue(1_000 + 59_000).unwrap(), 0);

        let fresh = queue
            .enqueue_record(&EntityRecord::new("product", "new", 2), OperationType::Create, 2)
            .unwrap();
        fx.manager
            .drain_queue(10, 1_000 + 61_000, |_| Ok::<(), String>(()))
            .unwrap();
        assert!(queue.get(&old).is_none());
        assert_eq!(queue.get(&fresh).unwrap().state, OperationState::Completed);
        assert_eq!(fx.manager.cleanup_queue(1_000 + 62_000).unwrap(), 0);
    }

    #[test]
    fn policy_override() {
        let fx = fixture(&["product"]);
        let mut policy = SchedulingPolicy::for_priority(SyncPriority::High);
        policy.initial_delay = Duration::ZERO;
        let manager = PrioritySyncManager::new(
            fx.manager.orchestrator().clone(),
            fx.manager.queue().clone(),
            ManualScheduler::new(),
        )
        .with_policy(SyncPriority::High, policy);

        let request = manager
            .schedule_sync_for_entity("product", "p", None, 100)
            .unwrap();
        assert_eq!(request.not_before, 100);
    }
}
