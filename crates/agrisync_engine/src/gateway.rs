//! Remote gateway abstraction.

use crate::error::{SyncError, SyncResult};
use agrisync_protocol::{EntityRecord, Timestamp};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The remote document store, as the engine sees it.
///
/// Implementations may be a REST client, a document-store SDK or a gRPC
/// stub. Pushing the same batch twice must leave the remote in the same
/// state as pushing it once.
///
/// Calls are synchronous and run while the orchestrator holds its pass
/// lock. Implementations must bound every call themselves, returning
/// [`SyncError::Timeout`](crate::SyncError::Timeout) or a transport error
/// once [`SyncConfig::gateway_timeout`](crate::SyncConfig::gateway_timeout)
/// has passed. The orchestrator only discards results that arrive late;
/// it cannot interrupt a call that never returns.
pub trait RemoteGateway: Send + Sync {
    /// Rows of `entity_type` with `updated_at > since`, ascending by
    /// `updated_at`, at most `limit` of them.
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>>;

    /// Writes `records` and returns how many the remote accepted.
    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32>;

    /// Cheap reachability check.
    fn is_reachable(&self) -> bool {
        true
    }

    /// Forgets an earlier transport failure.
    ///
    /// Called at the start of every pass the device monitor lets through.
    fn reconnect(&self) {}
}

impl<G: RemoteGateway + ?Sized> RemoteGateway for Arc<G> {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        (**self).fetch_updated(entity_type, since, limit)
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        (**self).push_batch(entity_type, records)
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }

    fn reconnect(&self) {
        (**self).reconnect()
    }
}

/// A scripted gateway for unit tests.
///
/// Fetch responses are queued per domain and consumed in order; once a
/// domain's queue is empty, fetches return no rows. Pushes are recorded and
/// acknowledged in full unless an ack count or an error is scripted.
#[derive(Debug)]
pub struct MockGateway {
    connected: AtomicBool,
    fetches: Mutex<HashMap<String, VecDeque<SyncResult<Vec<EntityRecord>>>>>,
    push_results: Mutex<VecDeque<SyncResult<u32>>>,
    pushed: Mutex<Vec<(String, Vec<EntityRecord>)>>,
    fetch_calls: Mutex<Vec<(String, Timestamp, u32)>>,
}

impl MockGateway {
    /// Creates a connected gateway with nothing scripted.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            fetches: Mutex::new(HashMap::new()),
            push_results: Mutex::new(VecDeque::new()),
            pushed: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a page of rows for the next fetch of `entity_type`.
    pub fn queue_fetch(&self, entity_type: &str, records: Vec<EntityRecord>) {
        self.fetches
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push_back(Ok(records));
    }

    /// Queues an error for the next fetch of `entity_type`.
    pub fn queue_fetch_error(&self, entity_type: &str, error: SyncError) {
        self.fetches
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Scripts the result of the next push.
    pub fn queue_push_result(&self, result: SyncResult<u32>) {
        self.push_results.lock().push_back(result);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every acknowledged or attempted push, in order.
    pub fn pushed(&self) -> Vec<(String, Vec<EntityRecord>)> {
        self.pushed.lock().clone()
    }

    /// Every fetch call as `(entity_type, since, limit)`.
    pub fn fetch_calls(&self) -> Vec<(String, Timestamp, u32)> {
        self.fetch_calls.lock().clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteGateway for MockGateway {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }
        self.fetch_calls
            .lock()
            .push((entity_type.to_string(), since, limit));
        self.fetches
            .lock()
            .get_mut(entity_type)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }
        self.pushed
            .lock()
            .push((entity_type.to_string(), records.to_vec()));
        self.push_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(records.len() as u32))
    }

    fn is_reachable(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
