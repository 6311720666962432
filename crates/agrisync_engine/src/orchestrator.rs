//! Sync orchestrator.
//!
//! Runs one pass over every registered domain, in registration order:
//!
//! 1. **Pull** remote rows changed since the domain watermark and route
//!    each through the [`ConflictResolver`] when the local row is dirty
//! 2. **Push** dirty local rows and mark acknowledged ones synced
//! 3. **Purge** acknowledged soft deletes and stale cache rows
//! 4. **Advance** the watermark, only if 1-3 succeeded
//!
//! A failing domain is reported and skipped; it never blocks the others.
//!
//! ## Key Invariants
//!
//! - Only one pass runs at a time; a second trigger is a no-op
//! - A failed domain keeps its watermark
//! - Watermarks never move backwards
//! - Cancellation is honoured between domains, never inside one
//! - A gateway call that overruns its deadline counts as failed, even if
//!   it eventually returned data

use crate::config::{millis, SyncConfig};
use crate::device::{DeviceMonitor, StaticDeviceMonitor};
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::observer::{SyncObserver, TracingObserver};
use crate::state::{SyncState, SyncStateStore};
use crate::store::LocalStore;
use agrisync_protocol::domain::{is_cache_domain, STANDARD_DOMAIN_ORDER};
use agrisync_protocol::{
    ConflictResolver, ConflictResult, ConflictStrategy, EntityKey, EntityRecord, SyncPriority,
    Timestamp, Winner,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where the orchestrator is in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No pass has run yet.
    Idle,
    /// Pulling remote changes.
    Pulling,
    /// Pushing local changes.
    Pushing,
    /// Purging deleted and stale rows.
    Purging,
    /// Last pass finished without failures.
    Synced,
    /// Last pass finished with at least one failed domain.
    Error,
    /// Last trigger found the device offline.
    Offline,
}

impl SyncPhase {
    /// Returns true while a domain is being processed.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Pulling | SyncPhase::Pushing | SyncPhase::Purging)
    }
}

/// A domain that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFailure {
    /// Domain name.
    pub domain: String,
    /// Error text.
    pub error: String,
    /// True if a later attempt may succeed.
    pub retryable: bool,
}

impl DomainFailure {
    fn new(domain: &str, error: &SyncError) -> Self {
        Self {
            domain: domain.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Rows acknowledged by the remote.
    pub pushed: u64,
    /// Remote rows written locally.
    pub pulled: u64,
    /// Conflicts settled automatically.
    pub conflicts_resolved: u64,
    /// Conflicts handed to the user.
    pub conflicts_escalated: u64,
    /// Rows purged locally.
    pub purged: u64,
    /// Domains that failed, in processing order.
    pub failed_domains: Vec<DomainFailure>,
    /// The pass stopped early at a domain boundary.
    pub cancelled: bool,
    /// Another pass was running; nothing was done.
    pub skipped: bool,
    /// The device was offline; nothing was done.
    pub offline: bool,
}

impl SyncStats {
    /// Returns true if every domain ran and succeeded.
    pub fn is_success(&self) -> bool {
        self.failed_domains.is_empty() && !self.cancelled && !self.skipped
    }

    /// Adds counters and failures from `other`.
    pub fn merge(&mut self, other: SyncStats) {
        self.pushed += other.pushed;
        self.pulled += other.pulled;
        self.conflicts_resolved += other.conflicts_resolved;
        self.conflicts_escalated += other.conflicts_escalated;
        self.purged += other.purged;
        self.failed_domains.extend(other.failed_domains);
        self.cancelled |= other.cancelled;
    }
}

/// Counters accumulated across passes.
#[derive(Debug, Clone, Default)]
pub struct LifetimeStats {
    /// Passes that ran.
    pub passes: u64,
    /// Triggers ignored because a pass was running.
    pub passes_skipped: u64,
    /// Triggers short-circuited because the device was offline.
    pub passes_offline: u64,
    /// Domain failures.
    pub domain_failures: u64,
    /// Rows pulled.
    pub pulled: u64,
    /// Rows pushed.
    pub pushed: u64,
    /// Conflicts settled automatically.
    pub conflicts_resolved: u64,
    /// Conflicts handed to the user.
    pub conflicts_escalated: u64,
    /// Rows purged.
    pub purged: u64,
    /// Domain retries by [`SyncOrchestrator::sync_all_with_retry`].
    pub retries: u64,
    /// Time of the last pass.
    pub last_pass_at: Option<Timestamp>,
    /// Last domain error.
    pub last_error: Option<String>,
}

/// A conflict waiting for a user decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    /// Local version, still dirty.
    pub local: EntityRecord,
    /// Remote version.
    pub remote: EntityRecord,
    /// Differing fields.
    pub conflicting_fields: Vec<String>,
    /// When it was escalated.
    pub detected_at: Timestamp,
}

/// One domain and its collaborators.
pub struct DomainDescriptor {
    /// Domain (entity type) name.
    pub name: String,
    /// Local rows.
    pub store: Arc<dyn LocalStore>,
    /// Remote rows.
    pub gateway: Arc<dyn RemoteGateway>,
    /// Conflict strategy; `None` uses the resolver's default for the type.
    pub strategy: Option<ConflictStrategy>,
    /// Priority class.
    pub priority: SyncPriority,
    /// Evict stale clean rows during purge.
    pub evict_stale: bool,
}

impl DomainDescriptor {
    /// Creates a descriptor with the default priority and eviction policy
    /// for `name`.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        let name = name.into();
        Self {
            priority: SyncPriority::for_entity_type(&name),
            evict_stale: is_cache_domain(&name),
            name,
            store,
            gateway,
            strategy: None,
        }
    }

    /// Forces a conflict strategy.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Overrides the priority class.
    pub fn with_priority(mut self, priority: SyncPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Enables or disables stale eviction.
    pub fn with_stale_eviction(mut self, evict: bool) -> Self {
        self.evict_stale = evict;
        self
    }
}

impl std::fmt::Debug for DomainDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainDescriptor")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("priority", &self.priority)
            .field("evict_stale", &self.evict_stale)
            .finish()
    }
}

/// Ordered list of domains. Passes visit domains in registration order.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: Vec<DomainDescriptor>,
}

impl DomainRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the standard domains, dependencies first, all bound to
    /// the same store and gateway.
    pub fn standard(store: Arc<dyn LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        let mut registry = Self::new();
        for name in STANDARD_DOMAIN_ORDER {
            registry.register(DomainDescriptor::new(*name, store.clone(), gateway.clone()));
        }
        registry
    }

    /// Adds a domain at the end, or replaces a same-named one in place.
    pub fn register(&mut self, descriptor: DomainDescriptor) -> &mut Self {
        match self.domains.iter_mut().find(|d| d.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => self.domains.push(descriptor),
        }
        self
    }

    /// Looks up a domain.
    pub fn get(&self, name: &str) -> Option<&DomainDescriptor> {
        self.domains.iter().find(|d| d.name == name)
    }

    /// Domain names in order.
    pub fn names(&self) -> Vec<&str> {
        self.domains.iter().map(|d| d.name.as_str()).collect()
    }

    /// Iterates domains in order.
    pub fn iter(&self) -> impl Iterator<Item = &DomainDescriptor> {
        self.domains.iter()
    }

    /// Number of domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if no domain is registered.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Cancels a running pass at the next domain boundary.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct DomainOutcome {
    pulled: u64,
    pushed: u64,
    conflicts_resolved: u64,
    conflicts_escalated: u64,
    purged: u64,
}

struct PullProgress {
    complete: bool,
    max_seen: Option<Timestamp>,
}

/// Runs sync passes across registered domains.
pub struct SyncOrchestrator {
    config: SyncConfig,
    registry: DomainRegistry,
    resolver: ConflictResolver,
    state_store: Arc<dyn SyncStateStore>,
    device: Arc<dyn DeviceMonitor>,
    observer: Arc<dyn SyncObserver>,
    phase: RwLock<SyncPhase>,
    pass_lock: Mutex<()>,
    cancelled: Arc<AtomicBool>,
    inbox: Mutex<BTreeMap<EntityKey, PendingConflict>>,
    /// Remote versions the user chose to overrule, until the local row is pushed.
    overruled: Mutex<BTreeMap<EntityKey, Timestamp>>,
    lifetime: RwLock<LifetimeStats>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator. The device is assumed online until a
    /// monitor is attached.
    pub fn new(
        config: SyncConfig,
        registry: DomainRegistry,
        state_store: Arc<dyn SyncStateStore>,
    ) -> Self {
        Self {
            config,
            registry,
            resolver: ConflictResolver::new(),
            state_store,
            device: Arc::new(StaticDeviceMonitor::default()),
            observer: Arc::new(TracingObserver),
            phase: RwLock::new(SyncPhase::Idle),
            pass_lock: Mutex::new(()),
            cancelled: Arc::new(AtomicBool::new(false)),
            inbox: Mutex::new(BTreeMap::new()),
            overruled: Mutex::new(BTreeMap::new()),
            lifetime: RwLock::new(LifetimeStats::default()),
        }
    }

    /// Attaches a device monitor.
    #[must_use]
    pub fn with_device_monitor(mut self, device: Arc<dyn DeviceMonitor>) -> Self {
        self.device = device;
        self
    }

    /// Attaches an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replaces the conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Counters across all passes.
    pub fn lifetime_stats(&self) -> LifetimeStats {
        self.lifetime.read().clone()
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The registered domains.
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// The device monitor.
    pub fn device(&self) -> &Arc<dyn DeviceMonitor> {
        &self.device
    }

    /// Current watermarks and pass metadata.
    pub fn state(&self) -> SyncResult<SyncState> {
        self.state_store.get()
    }

    /// Requests cancellation of the running pass.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle that can cancel passes from another component.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Runs one pass over all domains.
    ///
    /// Returns `Err` only when the pass cannot start at all (the sync state
    /// cannot be read). Domain failures are reported in
    /// [`SyncStats::failed_domains`].
    pub fn sync_all(&self, now: Timestamp) -> SyncResult<SyncStats> {
        let Some(_pass) = self.pass_lock.try_lock() else {
            tracing::debug!("sync pass already running, trigger ignored");
            self.lifetime.write().passes_skipped += 1;
            return Ok(SyncStats {
                skipped: true,
                ..SyncStats::default()
            });
        };
        self.cancelled.store(false, Ordering::SeqCst);

        if !self.device.is_online() {
            tracing::info!("device offline, sync pass skipped");
            self.set_phase(SyncPhase::Offline);
            self.lifetime.write().passes_offline += 1;
            return Ok(SyncStats {
                offline: true,
                ..SyncStats::default()
            });
        }

        for descriptor in self.registry.iter() {
            descriptor.gateway.reconnect();
        }

        let started = Instant::now();
        let mut state = self.state_store.get().map_err(|e| {
            self.set_phase(SyncPhase::Error);
            self.lifetime.write().last_error = Some(e.to_string());
            e
        })?;
        if state.device_id.is_empty() {
            state.device_id = self.config.device_id.clone();
        }

        let mut stats = SyncStats::default();
        for descriptor in self.registry.iter() {
            if self.cancelled.load(Ordering::SeqCst) {
                tracing::info!(next = %descriptor.name, "sync pass cancelled");
                stats.cancelled = true;
                break;
            }
            let (outcome, result) = self.sync_one(descriptor, &mut state, now);
            add_outcome(&mut stats, &outcome);
            if let Err(e) = result {
                stats.failed_domains.push(DomainFailure::new(&descriptor.name, &e));
            }
        }

        state.last_pass_at = Some(now);
        state.last_pass_ok = stats.is_success();
        if let Err(e) = self.state_store.upsert(&state) {
            tracing::warn!(error = %e, "failed to record pass metadata");
        }

        self.set_phase(if stats.failed_domains.is_empty() {
            SyncPhase::Synced
        } else {
            SyncPhase::Error
        });
        self.record_pass(&stats, now);
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "sync pass finished");
        self.observer.on_pass_completed(&stats);
        Ok(stats)
    }

    /// Runs [`sync_all`](Self::sync_all), then retries retryable domain
    /// failures with backoff while attempts remain.
    pub fn sync_all_with_retry(&self, now: Timestamp) -> SyncResult<SyncStats> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        let mut stats = loop {
            match self.sync_all(now) {
                Ok(stats) => break stats,
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    tracing::warn!(attempt, error = %e, "sync pass failed, retrying");
                    std::thread::sleep(retry.delay_for_attempt(attempt));
                }
                Err(e) => return Err(e),
            }
        };

        while attempt + 1 < retry.max_attempts && !stats.cancelled && !stats.skipped {
            let retryable: Vec<String> = stats
                .failed_domains
                .iter()
                .filter(|f| f.retryable)
                .map(|f| f.domain.clone())
                .collect();
            if retryable.is_empty() {
                break;
            }

            attempt += 1;
            std::thread::sleep(retry.delay_for_attempt(attempt));
            stats.failed_domains.retain(|f| !f.retryable);

            for domain in retryable {
                self.lifetime.write().retries += 1;
                match self.sync_domain(&domain, now) {
                    Ok(domain_stats) => stats.merge(domain_stats),
                    Err(e) => stats.failed_domains.push(DomainFailure::new(&domain, &e)),
                }
            }
        }

        Ok(stats)
    }

    /// Runs the pull-push-purge-advance cycle for one domain.
    ///
    /// Unlike [`sync_all`](Self::sync_all), a failure is returned as `Err`,
    /// as are [`SyncError::AlreadyRunning`] and, when offline,
    /// [`SyncError::NotConnected`].
    pub fn sync_domain(&self, name: &str, now: Timestamp) -> SyncResult<SyncStats> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| SyncError::UnknownDomain(name.to_string()))?;
        let Some(_pass) = self.pass_lock.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };
        if !self.device.is_online() {
            self.set_phase(SyncPhase::Offline);
            return Err(SyncError::NotConnected);
        }
        descriptor.gateway.reconnect();

        let mut state = self.state_store.get()?;
        let (outcome, result) = self.sync_one(descriptor, &mut state, now);
        let mut stats = SyncStats::default();
        add_outcome(&mut stats, &outcome);
        if let Err(e) = &result {
            stats.failed_domains.push(DomainFailure::new(name, e));
        }
        self.set_phase(if result.is_ok() {
            SyncPhase::Synced
        } else {
            SyncPhase::Error
        });
        self.record_pass(&stats, now);
        result.map(|_| stats)
    }

    /// Escalated conflicts awaiting a decision.
    pub fn pending_conflicts(&self) -> Vec<PendingConflict> {
        self.inbox.lock().values().cloned().collect()
    }

    /// Settles an escalated conflict.
    ///
    /// `Winner::Remote` stores the remote version as synced.
    /// `Winner::Local` keeps the local version, restamped after the remote
    /// one, so the next pass pushes it. Blocks while a pass is running.
    ///
    /// If the local row was edited after the conflict was escalated, nothing
    /// is written: the conflict is re-escalated against the current row and
    /// `ConflictChanged` is returned. A row that no longer exists drops the
    /// conflict.
    pub fn resolve_pending(
        &self,
        entity_type: &str,
        entity_id: &str,
        winner: Winner,
        now: Timestamp,
    ) -> SyncResult<EntityRecord> {
        let _pass = self.pass_lock.lock();
        let descriptor = self
            .registry
            .get(entity_type)
            .ok_or_else(|| SyncError::UnknownDomain(entity_type.to_string()))?;

        let key = EntityKey::new(entity_type, entity_id);
        let pending = self
            .inbox
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::NoPendingConflict(key.to_string()))?;

        // The decision was made against `pending.local`; a newer local edit
        // has to be shown to the user again before anything is written.
        match descriptor.store.find(entity_type, entity_id)? {
            Some(current) if current.same_version(&pending.local) => {}
            Some(current) => {
                let fields = current.differing_fields(&pending.remote);
                self.inbox.lock().insert(
                    key.clone(),
                    PendingConflict {
                        local: current,
                        remote: pending.remote,
                        conflicting_fields: fields.clone(),
                        detected_at: now,
                    },
                );
                self.observer.on_conflict_escalated(&key, &fields);
                return Err(SyncError::ConflictChanged(key.to_string()));
            }
            None => {
                self.inbox.lock().remove(&key);
                return Err(SyncError::ConflictChanged(key.to_string()));
            }
        }

        let chosen = match winner {
            Winner::Remote => synced_copy(pending.remote.clone(), now),
            Winner::Local => {
                let mut local = pending.local.clone();
                local.updated_at = now.max(pending.remote.updated_at + 1);
                local.dirty = true;
                local
            }
        };

        descriptor.store.upsert_all(std::slice::from_ref(&chosen))?;
        self.inbox.lock().remove(&key);
        if winner == Winner::Local {
            self.overruled.lock().insert(key.clone(), pending.remote.updated_at);
        }
        tracing::info!(entity = %key, ?winner, "pending conflict resolved by user");
        Ok(chosen)
    }

    fn record_pass(&self, stats: &SyncStats, now: Timestamp) {
        let mut lifetime = self.lifetime.write();
        lifetime.passes += 1;
        lifetime.pulled += stats.pulled;
        lifetime.pushed += stats.pushed;
        lifetime.conflicts_resolved += stats.conflicts_resolved;
        lifetime.conflicts_escalated += stats.conflicts_escalated;
        lifetime.purged += stats.purged;
        lifetime.domain_failures += stats.failed_domains.len() as u64;
        lifetime.last_pass_at = Some(now);
        if let Some(failure) = stats.failed_domains.last() {
            lifetime.last_error = Some(format!("{}: {}", failure.domain, failure.error));
        }
    }

    /// Runs one domain and reports it to the observer.
    fn sync_one(
        &self,
        descriptor: &DomainDescriptor,
        state: &mut SyncState,
        now: Timestamp,
    ) -> (DomainOutcome, SyncResult<Timestamp>) {
        let mut outcome = DomainOutcome::default();
        let result = self.run_domain(descriptor, state, now, &mut outcome);
        match &result {
            Ok(watermark) => {
                tracing::debug!(
                    domain = %descriptor.name,
                    pulled = outcome.pulled,
                    pushed = outcome.pushed,
                    purged = outcome.purged,
                    watermark,
                    "domain synced"
                );
                self.observer.on_domain_synced(
                    &descriptor.name,
                    outcome.pulled,
                    outcome.pushed,
                    *watermark,
                );
            }
            Err(e) => self.observer.on_domain_failed(&descriptor.name, &e.to_string()),
        }
        (outcome, result)
    }

    fn run_domain(
        &self,
        d: &DomainDescriptor,
        state: &mut SyncState,
        now: Timestamp,
        outcome: &mut DomainOutcome,
    ) -> SyncResult<Timestamp> {
        let prior = state.watermark(&d.name);

        self.set_phase(SyncPhase::Pulling);
        let pull = self.pull(d, prior, now, outcome)?;

        self.set_phase(SyncPhase::Pushing);
        let push_complete = self.push(d, prior, now, outcome)?;

        self.set_phase(SyncPhase::Purging);
        outcome.purged += self.purge(d, now)? as u64;

        let target = match (pull.complete, push_complete) {
            (_, false) => prior,
            (true, true) => now,
            (false, true) => pull.max_seen.unwrap_or(prior),
        };
        let target = target.min(self.watermark_ceiling(d)?);

        let mut next = state.clone();
        let watermark = next.advance(&d.name, target);
        self.state_store.upsert(&next)?;
        *state = next;
        Ok(watermark)
    }

    fn pull(
        &self,
        d: &DomainDescriptor,
        since: Timestamp,
        now: Timestamp,
        outcome: &mut DomainOutcome,
    ) -> SyncResult<PullProgress> {
        let limit = self.config.page_limit;
        let mut cursor = since;
        let mut max_seen = None;

        for _ in 0..self.config.max_pages_per_domain {
            let page = self.timed(&d.name, || d.gateway.fetch_updated(&d.name, cursor, limit))?;
            if let Some(stray) = page.iter().find(|r| r.entity_type != d.name) {
                return Err(SyncError::Codec(format!(
                    "fetch for {} returned {}",
                    d.name,
                    stray.key()
                )));
            }

            let fetched = page.len();
            for remote in page {
                cursor = cursor.max(remote.updated_at);
                max_seen = max_seen.max(Some(remote.updated_at));
                self.apply_remote(d, remote, now, outcome)?;
            }

            if fetched < limit as usize {
                return Ok(PullProgress {
                    complete: true,
                    max_seen,
                });
            }
        }

        tracing::debug!(domain = %d.name, "pull page cap reached");
        Ok(PullProgress {
            complete: false,
            max_seen,
        })
    }

    fn apply_remote(
        &self,
        d: &DomainDescriptor,
        remote: EntityRecord,
        now: Timestamp,
        outcome: &mut DomainOutcome,
    ) -> SyncResult<()> {
        let local = match d.store.find(&d.name, &remote.entity_id)? {
            None => {
                d.store.upsert_all(&[synced_copy(remote, now)])?;
                outcome.pulled += 1;
                return Ok(());
            }
            Some(local) => local,
        };

        if local.same_version(&remote) {
            if local.dirty {
                d.store.upsert_all(&[synced_copy(remote, now)])?;
                self.inbox.lock().remove(&local.key());
            }
            return Ok(());
        }

        if !local.dirty {
            d.store.upsert_all(&[synced_copy(remote, now)])?;
            outcome.pulled += 1;
            return Ok(());
        }

        let key = local.key();
        if self.is_overruled(&key, &remote) {
            return Ok(());
        }
        match self.resolver.resolve(&local, &remote, d.strategy) {
            ConflictResult::Resolved {
                value,
                strategy,
                winner: Winner::Remote,
            } => {
                tracing::debug!(entity = %key, %strategy, "conflict resolved for remote");
                d.store.upsert_all(&[synced_copy(value, now)])?;
                self.inbox.lock().remove(&key);
                outcome.pulled += 1;
                outcome.conflicts_resolved += 1;
            }
            ConflictResult::Resolved {
                mut value,
                strategy,
                winner: Winner::Local,
            } => {
                tracing::debug!(entity = %key, %strategy, "conflict resolved for local");
                if value.updated_at <= remote.updated_at {
                    value.updated_at = remote.updated_at + 1;
                }
                value.dirty = true;
                d.store.upsert_all(&[value])?;
                self.inbox.lock().remove(&key);
                outcome.conflicts_resolved += 1;
            }
            ConflictResult::NeedsUserInput {
                local,
                remote,
                conflicting_fields,
            } => {
                let fields = conflicting_fields.clone();
                let previous = self.inbox.lock().insert(
                    key.clone(),
                    PendingConflict {
                        local: local.clone(),
                        remote: remote.clone(),
                        conflicting_fields,
                        detected_at: now,
                    },
                );
                let already_known = previous
                    .is_some_and(|p| p.remote.same_version(&remote) && p.local == local);
                if !already_known {
                    self.observer.on_conflict_escalated(&key, &fields);
                    outcome.conflicts_escalated += 1;
                }
            }
            ConflictResult::Error(message) => return Err(SyncError::Conflict(message)),
        }
        Ok(())
    }

    /// Pushes dirty rows. Returns false if the page cap stopped it early.
    fn push(
        &self,
        d: &DomainDescriptor,
        since: Timestamp,
        now: Timestamp,
        outcome: &mut DomainOutcome,
    ) -> SyncResult<bool> {
        let limit = self.config.page_limit as usize;

        for _ in 0..self.config.max_pages_per_domain {
            let held = self.held_ids(&d.name);
            let request = u32::try_from(limit + held.len()).unwrap_or(u32::MAX);
            let batch: Vec<EntityRecord> = d
                .store
                .find_changed_since(&d.name, since, request)?
                .into_iter()
                .filter(|r| !held.contains(&r.entity_id))
                .take(limit)
                .collect();
            if batch.is_empty() {
                return Ok(true);
            }

            let acknowledged =
                self.timed(&d.name, || d.gateway.push_batch(&d.name, &batch))? as usize;
            if acknowledged < batch.len() {
                return Err(SyncError::PartialAck {
                    expected: batch.len(),
                    acknowledged,
                });
            }

            let versions: Vec<(String, Timestamp)> = batch
                .iter()
                .map(|r| (r.entity_id.clone(), r.updated_at))
                .collect();
            let marked = d.store.mark_synced(&d.name, &versions, now)?;
            {
                let mut overruled = self.overruled.lock();
                for record in &batch {
                    overruled.remove(&record.key());
                }
            }
            if marked < batch.len() {
                tracing::debug!(
                    domain = %d.name,
                    edited = batch.len() - marked,
                    "rows edited during push stay dirty"
                );
            }
            outcome.pushed += batch.len() as u64;

            if batch.len() < limit {
                return Ok(true);
            }
        }

        tracing::debug!(domain = %d.name, "push page cap reached");
        Ok(false)
    }

    fn purge(&self, d: &DomainDescriptor, now: Timestamp) -> SyncResult<usize> {
        let mut purged = d.store.purge_soft_deleted(&d.name)?;
        if d.evict_stale {
            let threshold = now.saturating_sub(millis(self.config.stale_after));
            purged += d.store.purge_stale_before(&d.name, threshold)?;
        }
        Ok(purged)
    }

    /// Highest watermark that still refetches every pending conflict and
    /// every row left dirty by this pass.
    fn watermark_ceiling(&self, d: &DomainDescriptor) -> SyncResult<Timestamp> {
        let held: Vec<(String, Timestamp)> = self
            .inbox
            .lock()
            .values()
            .filter(|p| p.remote.entity_type == d.name)
            .map(|p| (p.remote.entity_id.clone(), p.remote.updated_at))
            .collect();

        let mut ceiling = held
            .iter()
            .map(|(_, updated_at)| updated_at - 1)
            .min()
            .unwrap_or(Timestamp::MAX);

        let request = u32::try_from(held.len() + 1).unwrap_or(u32::MAX);
        let oldest_dirty = d
            .store
            .find_changed_since(&d.name, Timestamp::MIN, request)?
            .into_iter()
            .find(|r| !held.iter().any(|(id, _)| *id == r.entity_id));
        if let Some(row) = oldest_dirty {
            ceiling = ceiling.min(row.updated_at - 1);
        }
        Ok(ceiling)
    }

    /// Returns true if the user already kept the local row over exactly
    /// this remote version. A newer remote version clears the decision.
    fn is_overruled(&self, key: &EntityKey, remote: &EntityRecord) -> bool {
        let mut overruled = self.overruled.lock();
        match overruled.get(key) {
            Some(at) if *at == remote.updated_at => true,
            Some(_) => {
                overruled.remove(key);
                false
            }
            None => false,
        }
    }

    fn held_ids(&self, domain: &str) -> BTreeSet<String> {
        self.inbox
            .lock()
            .keys()
            .filter(|k| k.entity_type == domain)
            .map(|k| k.entity_id.clone())
            .collect()
    }

    /// Runs a gateway call, discarding its result if it overran the deadline.
    ///
    /// The call itself is not interrupted; gateways enforce their own
    /// deadline (see [`RemoteGateway`]).
    fn timed<T>(&self, domain: &str, call: impl FnOnce() -> SyncResult<T>) -> SyncResult<T> {
        let started = Instant::now();
        let result = call();
        let elapsed = started.elapsed();
        if elapsed > self.config.gateway_timeout {
            tracing::warn!(
                domain,
                elapsed_ms = elapsed.as_millis() as u64,
                "gateway call exceeded deadline, result discarded"
            );
            return Err(SyncError::Timeout);
        }
        result
    }
}

fn synced_copy(mut record: EntityRecord, now: Timestamp) -> EntityRecord {
    record.dirty = false;
    record.synced_at = Some(now);
    record
}

fn add_outcome(stats: &mut SyncStats, outcome: &DomainOutcome) {
    stats.pulled += outcome.pulled;
    stats.pushed += outcome.pushed;
    stats.conflicts_resolved += outcome.conflicts_resolved;
    stats.conflicts_escalated += outcome.conflicts_escalated;
    stats.purged += outcome.purged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::device::DeviceConditions;
    use crate::gateway::MockGateway;
    use crate::observer::{ObservedEvent, RecordingObserver};
    use crate::state::MemorySyncStateStore;
    use crate::store::MemoryLocalStore;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;

    const NOW: Timestamp = 5_000;

    struct Fixture {
        store: Arc<MemoryLocalStore>,
        gateway: Arc<MockGateway>,
        state: Arc<MemorySyncStateStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryLocalStore::new()),
                gateway: Arc::new(MockGateway::new()),
                state: Arc::new(MemorySyncStateStore::default()),
            }
        }

        fn domain(&self, name: &str) -> DomainDescriptor {
            DomainDescriptor::new(name, self.store.clone(), self.gateway.clone())
        }

        fn orchestrator(&self, domains: Vec<DomainDescriptor>) -> SyncOrchestrator {
            self.orchestrator_with(SyncConfig::new("device-1"), domains)
        }

        fn orchestrator_with(
            &self,
            config: SyncConfig,
            domains: Vec<DomainDescriptor>,
        ) -> SyncOrchestrator {
            let mut registry = DomainRegistry::new();
            for d in domains {
                registry.register(d);
            }
            SyncOrchestrator::new(config, registry, self.state.clone())
        }

        fn watermark(&self, domain: &str) -> Timestamp {
            self.state.get().unwrap().watermark(domain)
        }
    }

    fn product(id: &str, updated_at: Timestamp, price: i64) -> EntityRecord {
        EntityRecord::new("product", id, updated_at).with_field("price", price)
    }

    #[test]
    fn newest_wins_takes_newer_remote() {
        let fx = Fixture::new();
        fx.store.put(product("T-10000", 1_000, 200).dirty());
        fx.gateway.queue_fetch("product", vec![product("T-10000", 2_000, 250)]);

        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let stats = orchestrator.sync_domain("product", NOW).unwrap();

        let row = fx.store.get("product", "T-10000").unwrap();
        assert_eq!(row.field("price"), Some(&json!(250)));
        assert!(!row.dirty);
        assert_eq!(row.synced_at, Some(NOW));
        assert_eq!(stats.conflicts_resolved, 1);
        assert!(fx.gateway.pushed().is_empty());
        assert_eq!(fx.watermark("product"), NOW);
        assert_eq!(orchestrator.phase(), SyncPhase::Synced);
    }

    #[test]
    fn server_wins_overwrites_local_transfer() {
        let fx = Fixture::new();
        fx.store.put(
            EntityRecord::new("transfer", "tr-1", 3_000)
                .with_field("status", "CANCELLED")
                .dirty(),
        );
        fx.gateway.queue_fetch(
            "transfer",
            vec![EntityRecord::new("transfer", "tr-1", 2_000).with_field("status", "COMPLETED")],
        );

        let orchestrator = fx.orchestrator(vec![fx.domain("transfer")]);
        orchestrator.sync_domain("transfer", NOW).unwrap();

        let row = fx.store.get("transfer", "tr-1").unwrap();
        assert_eq!(row.field("status"), Some(&json!("COMPLETED")));
        assert!(!row.dirty);
    }

    #[test]
    fn clean_rows_are_fast_forwarded() {
        let fx = Fixture::new();
        fx.store.put(product("p", 3_000, 1));
        fx.gateway.queue_fetch("product", vec![product("p", 2_000, 2)]);

        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let stats = orchestrator.sync_domain("product", NOW).unwrap();

        assert_eq!(stats.pulled, 1);
        assert_eq!(stats.conflicts_resolved, 0);
        assert_eq!(fx.store.get("product", "p").unwrap().field("price"), Some(&json!(2)));
    }

    #[test]
    fn repeated_pull_is_idempotent() {
        let fx = Fixture::new();
        let page = vec![product("a", 100, 1), product("b", 200, 2)];
        fx.gateway.queue_fetch("product", page.clone());
        fx.gateway.queue_fetch("product", page);

        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let first = orchestrator.sync_domain("product", NOW).unwrap();
        let snapshot = fx.store.all("product");
        let second = orchestrator.sync_domain("product", NOW + 10).unwrap();

        assert_eq!(first.pulled, 2);
        assert_eq!(second.pulled, 0);
        assert_eq!(fx.store.all("product"), snapshot);
    }

    #[test]
    fn client_wins_is_restamped_and_pushed() {
        let fx = Fixture::new();
        fx.store.put(
            EntityRecord::new("settings", "s", 1_000)
                .with_field("language", "sw")
                .dirty(),
        );
        fx.gateway.queue_fetch(
            "settings",
            vec![EntityRecord::new("settings", "s", 2_000).with_field("language", "en")],
        );

        let orchestrator = fx.orchestrator(vec![fx.domain("settings")]);
        let stats = orchestrator.sync_domain("settings", NOW).unwrap();

        let pushed = fx.gateway.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1[0].updated_at, 2_001);
        assert_eq!(pushed[0].1[0].field("language"), Some(&json!("sw")));
        assert_eq!(stats.pushed, 1);
        assert!(!fx.store.get("settings", "s").unwrap().dirty);
    }

    #[test]
    fn manual_conflicts_are_held_back_until_resolved() {
        let fx = Fixture::new();
        let observer = Arc::new(RecordingObserver::new());
        fx.store.put(product("p", 1_000, 200).dirty());
        let remote = product("p", 2_000, 300);
        fx.gateway.queue_fetch("product", vec![remote.clone()]);
        fx.gateway.queue_fetch("product", vec![remote]);

        let orchestrator = fx
            .orchestrator(vec![fx.domain("product").with_strategy(ConflictStrategy::Manual)])
            .with_observer(observer.clone());

        let stats = orchestrator.sync_domain("product", NOW).unwrap();
        assert_eq!(stats.conflicts_escalated, 1);
        assert!(fx.gateway.pushed().is_empty());
        assert!(fx.store.get("product", "p").unwrap().dirty);
        assert_eq!(fx.watermark("product"), 1_999);

        // Seeing the same conflict again does not escalate it twice.
        let again = orchestrator.sync_domain("product", NOW + 1).unwrap();
        assert_eq!(again.conflicts_escalated, 0);
        let escalations = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, ObservedEvent::ConflictEscalated { .. }))
            .count();
        assert_eq!(escalations, 1);

        let pending = orchestrator.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].conflicting_fields, vec!["price".to_string()]);

        let kept = orchestrator
            .resolve_pending("product", "p", Winner::Local, 6_000)
            .unwrap();
        assert_eq!(kept.updated_at, 6_000);
        assert!(orchestrator.pending_conflicts().is_empty());

        orchestrator.sync_domain("product", 7_000).unwrap();
        let pushed = fx.gateway.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1[0].field("price"), Some(&json!(200)));
        assert_eq!(fx.watermark("product"), 7_000);
    }

    #[test]
    fn edit_after_escalation_is_shown_again_before_resolving() {
        let fx = Fixture::new();
        let observer = Arc::new(RecordingObserver::new());
        fx.store.put(product("p", 1_000, 200).dirty());
        fx.gateway.queue_fetch("product", vec![product("p", 2_000, 300)]);

        let orchestrator = fx
            .orchestrator(vec![fx.domain("product").with_strategy(ConflictStrategy::Manual)])
            .with_observer(observer.clone());
        orchestrator.sync_domain("product", NOW).unwrap();

        fx.store.edit("product", "p", |row| row.set_field("price", 999, 5_500));

        let err = orchestrator
            .resolve_pending("product", "p", Winner::Remote, 6_000)
            .unwrap_err();
        assert!(matches!(err, SyncError::ConflictChanged(_)));
        assert_eq!(
            fx.store.get("product", "p").unwrap().field("price"),
            Some(&json!(999))
        );

        let pending = orchestrator.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local.field("price"), Some(&json!(999)));
        assert_eq!(pending[0].local.updated_at, 5_500);
        let escalations = observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, ObservedEvent::ConflictEscalated { .. }))
            .count();
        assert_eq!(escalations, 2);

        let kept = orchestrator
            .resolve_pending("product", "p", Winner::Local, 6_000)
            .unwrap();
        assert_eq!(kept.field("price"), Some(&json!(999)));
        assert!(orchestrator.pending_conflicts().is_empty());
    }

    #[test]
    fn resolving_unknown_conflict_fails() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let err = orchestrator
            .resolve_pending("product", "missing", Winner::Remote, NOW)
            .unwrap_err();
        assert!(matches!(err, SyncError::NoPendingConflict(_)));
    }

    #[test]
    fn failed_domain_keeps_watermark_and_others_continue() {
        let fx = Fixture::new();
        fx.gateway
            .queue_fetch_error("user", SyncError::transport_retryable("connection reset"));
        fx.gateway.queue_fetch("product", vec![product("p", 100, 1)]);

        let orchestrator = fx.orchestrator(vec![fx.domain("user"), fx.domain("product")]);
        let stats = orchestrator.sync_all(NOW).unwrap();

        assert_eq!(stats.failed_domains.len(), 1);
        assert_eq!(stats.failed_domains[0].domain, "user");
        assert!(stats.failed_domains[0].retryable);
        assert_eq!(stats.pulled, 1);
        assert_eq!(fx.watermark("user"), 0);
        assert_eq!(fx.watermark("product"), NOW);
        assert_eq!(orchestrator.phase(), SyncPhase::Error);

        let state = fx.state.get().unwrap();
        assert_eq!(state.last_pass_at, Some(NOW));
        assert!(!state.last_pass_ok);
    }

    #[test]
    fn partial_ack_fails_the_domain() {
        let fx = Fixture::new();
        fx.store.put(product("a", 100, 1).dirty());
        fx.store.put(product("b", 200, 2).dirty());
        fx.gateway.queue_push_result(Ok(1));

        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let err = orchestrator.sync_domain("product", NOW).unwrap_err();

        assert!(matches!(
            err,
            SyncError::PartialAck {
                expected: 2,
                acknowledged: 1
            }
        ));
        assert!(fx.store.get("product", "a").unwrap().dirty);
        assert!(fx.store.get("product", "b").unwrap().dirty);
        assert_eq!(fx.watermark("product"), 0);
    }

    #[test]
    fn offline_pass_does_nothing() {
        let fx = Fixture::new();
        let device = Arc::new(StaticDeviceMonitor::new(DeviceConditions::offline()));
        let orchestrator = fx
            .orchestrator(vec![fx.domain("product")])
            .with_device_monitor(device.clone());

        let stats = orchestrator.sync_all(NOW).unwrap();
        assert!(stats.offline);
        assert!(fx.gateway.fetch_calls().is_empty());
        assert_eq!(orchestrator.phase(), SyncPhase::Offline);
        assert!(matches!(
            orchestrator.sync_domain("product", NOW),
            Err(SyncError::NotConnected)
        ));

        device.set(DeviceConditions::online());
        assert!(!orchestrator.sync_all(NOW).unwrap().offline);
        assert_eq!(fx.gateway.fetch_calls().len(), 1);
    }

    #[test]
    fn unknown_domain_is_rejected() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator(vec![]);
        assert!(matches!(
            orchestrator.sync_domain("nope", NOW),
            Err(SyncError::UnknownDomain(_))
        ));
    }

    struct CancellingGateway(CancelHandle);

    impl RemoteGateway for CancellingGateway {
        fn fetch_updated(&self, _: &str, _: Timestamp, _: u32) -> SyncResult<Vec<EntityRecord>> {
            self.0.cancel();
            Ok(Vec::new())
        }

        fn push_batch(&self, _: &str, records: &[EntityRecord]) -> SyncResult<u32> {
            Ok(records.len() as u32)
        }
    }

    #[test]
    fn cancel_stops_at_the_next_domain() {
        let fx = Fixture::new();
        let flag = Arc::new(AtomicBool::new(false));
        let mut registry = DomainRegistry::new();
        registry.register(DomainDescriptor::new(
            "user",
            fx.store.clone(),
            Arc::new(CancellingGateway(CancelHandle(flag.clone()))),
        ));
        registry.register(fx.domain("product"));
        let orchestrator = SyncOrchestrator {
            cancelled: flag,
            ..SyncOrchestrator::new(SyncConfig::new("device-1"), registry, fx.state.clone())
        };

        // A stale request from before the pass is cleared when it starts.
        orchestrator.cancel();
        let stats = orchestrator.sync_all(NOW).unwrap();

        assert!(stats.cancelled);
        assert!(stats.failed_domains.is_empty());
        assert_eq!(fx.watermark("user"), NOW);
        assert_eq!(fx.watermark("product"), 0);
        assert!(fx.gateway.fetch_calls().is_empty());
        assert!(!fx.state.get().unwrap().last_pass_ok);
    }

    struct SlowGateway(Duration);

    impl RemoteGateway for SlowGateway {
        fn fetch_updated(
            &self,
            entity_type: &str,
            _: Timestamp,
            _: u32,
        ) -> SyncResult<Vec<EntityRecord>> {
            std::thread::sleep(self.0);
            Ok(vec![EntityRecord::new(entity_type, "late", 100)])
        }

        fn push_batch(&self, _: &str, records: &[EntityRecord]) -> SyncResult<u32> {
            Ok(records.len() as u32)
        }
    }

    #[test]
    fn overrunning_call_is_discarded() {
        let fx = Fixture::new();
        let mut registry = DomainRegistry::new();
        registry.register(DomainDescriptor::new(
            "product",
            fx.store.clone(),
            Arc::new(SlowGateway(Duration::from_millis(40))),
        ));
        let config = SyncConfig::new("device-1").with_gateway_timeout(Duration::from_millis(5));
        let orchestrator = SyncOrchestrator::new(config, registry, fx.state.clone());

        let err = orchestrator.sync_domain("product", NOW).unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
        assert!(fx.store.get("product", "late").is_none());
        assert_eq!(fx.watermark("product"), 0);
    }

    #[test]
    fn page_cap_advances_to_last_seen_row() {
        let fx = Fixture::new();
        fx.gateway
            .queue_fetch("product", vec![product("a", 100, 1), product("b", 200, 2)]);
        let config = SyncConfig::new("device-1")
            .with_page_limit(2)
            .with_max_pages_per_domain(1);
        let orchestrator = fx.orchestrator_with(config, vec![fx.domain("product")]);

        orchestrator.sync_domain("product", NOW).unwrap();
        assert_eq!(fx.watermark("product"), 200);
    }

    #[test]
    fn pages_are_followed_with_advancing_cursor() {
        let fx = Fixture::new();
        fx.gateway
            .queue_fetch("product", vec![product("a", 100, 1), product("b", 200, 2)]);
        fx.gateway.queue_fetch("product", vec![product("c", 300, 3)]);
        let config = SyncConfig::new("device-1").with_page_limit(2);
        let orchestrator = fx.orchestrator_with(config, vec![fx.domain("product")]);

        let stats = orchestrator.sync_domain("product", NOW).unwrap();
        assert_eq!(stats.pulled, 3);
        let cursors: Vec<Timestamp> = fx.gateway.fetch_calls().iter().map(|c| c.1).collect();
        assert_eq!(cursors, vec![0, 200]);
        assert_eq!(fx.watermark("product"), NOW);
    }

    #[test]
    fn acknowledged_soft_deletes_are_purged() {
        let fx = Fixture::new();
        let mut row = product("p", 100, 1);
        row.soft_delete(200);
        fx.store.put(row);

        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);
        let stats = orchestrator.sync_domain("product", NOW).unwrap();

        assert_eq!(stats.pushed, 1);
        assert_eq!(stats.purged, 1);
        assert!(fx.store.get("product", "p").is_none());
    }

    #[test]
    fn cache_domains_evict_stale_rows() {
        let fx = Fixture::new();
        let day = 24 * 60 * 60 * 1_000;
        let now = 30 * day;
        let mut old = EntityRecord::new("notification", "old", now - 20 * day);
        old.synced_at = Some(now - 20 * day);
        fx.store.put(old);
        fx.store.put(EntityRecord::new("notification", "fresh", now - day));

        let orchestrator = fx.orchestrator(vec![fx.domain("notification"), fx.domain("product")]);
        fx.store.put(EntityRecord::new("product", "old", 0));
        let stats = orchestrator.sync_all(now).unwrap();

        assert_eq!(stats.purged, 1);
        assert!(fx.store.get("notification", "old").is_none());
        assert!(fx.store.get("notification", "fresh").is_some());
        assert!(fx.store.get("product", "old").is_some());
    }

    struct EditingGateway {
        store: Arc<MemoryLocalStore>,
    }

    impl RemoteGateway for EditingGateway {
        fn fetch_updated(&self, _: &str, _: Timestamp, _: u32) -> SyncResult<Vec<EntityRecord>> {
            Ok(Vec::new())
        }

        fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
            self.store
                .edit(entity_type, "p", |row| row.set_field("price", 9, 4_000));
            Ok(records.len() as u32)
        }
    }

    #[test]
    fn edits_made_during_push_stay_dirty_and_hold_the_watermark() {
        let fx = Fixture::new();
        fx.store.put(product("p", 1_000, 1).dirty());
        let mut registry = DomainRegistry::new();
        registry.register(DomainDescriptor::new(
            "product",
            fx.store.clone(),
            Arc::new(EditingGateway {
                store: fx.store.clone(),
            }),
        ));
        let orchestrator =
            SyncOrchestrator::new(SyncConfig::new("device-1"), registry, fx.state.clone());

        orchestrator.sync_domain("product", NOW).unwrap();

        let row = fx.store.get("product", "p").unwrap();
        assert!(row.dirty);
        assert_eq!(row.updated_at, 4_000);
        assert_eq!(fx.watermark("product"), 3_999);
    }

    #[test]
    fn stray_rows_fail_the_domain() {
        let fx = Fixture::new();
        fx.gateway
            .queue_fetch("product", vec![EntityRecord::new("order", "o", 1)]);
        let orchestrator = fx.orchestrator(vec![fx.domain("product")]);

        assert!(matches!(
            orchestrator.sync_domain("product", NOW),
            Err(SyncError::Codec(_))
        ));
        assert!(fx.store.get("order", "o").is_none());
    }

    #[test]
    fn retry_reruns_only_failed_domains() {
        let fx = Fixture::new();
        fx.gateway
            .queue_fetch_error("user", SyncError::transport_retryable("reset"));
        fx.gateway.queue_fetch("user", vec![EntityRecord::new("user", "u", 10)]);
        fx.gateway
            .queue_fetch_error("product", SyncError::transport_fatal("forbidden"));

        let config = SyncConfig::new("device-1").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        );
        let orchestrator =
            fx.orchestrator_with(config, vec![fx.domain("user"), fx.domain("product")]);

        let stats = orchestrator.sync_all_with_retry(NOW).unwrap();

        assert_eq!(stats.failed_domains.len(), 1);
        assert_eq!(stats.failed_domains[0].domain, "product");
        assert!(!stats.failed_domains[0].retryable);
        assert_eq!(stats.pulled, 1);
        assert_eq!(fx.watermark("user"), NOW);
        assert_eq!(orchestrator.lifetime_stats().retries, 1);
        let product_fetches = fx
            .gateway
            .fetch_calls()
            .iter()
            .filter(|c| c.0 == "product")
            .count();
        assert_eq!(product_fetches, 1);
    }

    struct BlockingGateway {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl RemoteGateway for BlockingGateway {
        fn fetch_updated(&self, _: &str, _: Timestamp, _: u32) -> SyncResult<Vec<EntityRecord>> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            Ok(Vec::new())
        }

        fn push_batch(&self, _: &str, records: &[EntityRecord]) -> SyncResult<u32> {
            Ok(records.len() as u32)
        }
    }

    #[test]
    fn second_trigger_during_a_pass_is_skipped() {
        let fx = Fixture::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mut registry = DomainRegistry::new();
        registry.register(DomainDescriptor::new(
            "product",
            fx.store.clone(),
            Arc::new(BlockingGateway {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            SyncConfig::new("device-1"),
            registry,
            fx.state.clone(),
        ));

        let running = {
            let orchestrator = orchestrator.clone();
            std::thread::spawn(move || orchestrator.sync_all(NOW))
        };
        entered_rx.recv().unwrap();

        let second = orchestrator.sync_all(NOW).unwrap();
        assert!(second.skipped);
        assert!(matches!(
            orchestrator.sync_domain("product", NOW),
            Err(SyncError::AlreadyRunning)
        ));

        release_tx.send(()).unwrap();
        let first = running.join().unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(orchestrator.lifetime_stats().passes_skipped, 1);
    }

    #[test]
    fn standard_registry_orders_dependencies_first() {
        let fx = Fixture::new();
        let registry = DomainRegistry::standard(fx.store.clone(), fx.gateway.clone());
        let names = registry.names();
        assert_eq!(names.first(), Some(&"user"));
        let position = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(position("farm_asset") < position("product"));
        assert!(position("product") < position("order"));
        assert!(registry.get("notification").unwrap().evict_stale);
        assert!(!registry.get("order").unwrap().evict_stale);
    }

    #[test]
    fn register_replaces_in_place() {
        let fx = Fixture::new();
        let mut registry = DomainRegistry::new();
        registry.register(fx.domain("user"));
        registry.register(fx.domain("product"));
        registry.register(fx.domain("user").with_priority(SyncPriority::Low));

        assert_eq!(registry.names(), vec!["user", "product"]);
        assert_eq!(registry.get("user").unwrap().priority, SyncPriority::Low);
    }
}
