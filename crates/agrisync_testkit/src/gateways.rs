//! Fault-injecting gateway wrappers.

use agrisync_engine::{RemoteGateway, SyncError, SyncResult};
use agrisync_protocol::{EntityRecord, Timestamp};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails the first `n` calls, then delegates.
#[derive(Debug)]
pub struct FlakyGateway<G> {
    inner: G,
    remaining: AtomicUsize,
    calls: AtomicUsize,
    retryable: bool,
}

impl<G: RemoteGateway> FlakyGateway<G> {
    /// Fails the first `failures` calls with a retryable transport error.
    pub fn new(inner: G, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            retryable: true,
        }
    }

    /// Fails the first `failures` calls with a fatal transport error.
    pub fn fatal(inner: G, failures: usize) -> Self {
        Self {
            retryable: false,
            ..Self::new(inner, failures)
        }
    }

    /// Calls received, failed or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Arms `failures` more failures.
    pub fn fail_next(&self, failures: usize) {
        self.remaining.store(failures, Ordering::SeqCst);
    }

    fn inject(&self) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !armed {
            return Ok(());
        }
        Err(SyncError::Transport {
            message: "injected failure".into(),
            retryable: self.retryable,
        })
    }
}

impl<G: RemoteGateway> RemoteGateway for FlakyGateway<G> {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        self.inject()?;
        self.inner.fetch_updated(entity_type, since, limit)
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        self.inject()?;
        self.inner.push_batch(entity_type, records)
    }

    fn is_reachable(&self) -> bool {
        self.inner.is_reachable()
    }
}

/// Sleeps before every call, then delegates.
#[derive(Debug)]
pub struct SlowGateway<G> {
    inner: G,
    delay: Duration,
}

impl<G: RemoteGateway> SlowGateway<G> {
    /// Delays every call by `delay`.
    pub fn new(inner: G, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<G: RemoteGateway> RemoteGateway for SlowGateway<G> {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        std::thread::sleep(self.delay);
        self.inner.fetch_updated(entity_type, since, limit)
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        std::thread::sleep(self.delay);
        self.inner.push_batch(entity_type, records)
    }

    fn is_reachable(&self) -> bool {
        self.inner.is_reachable()
    }
}
