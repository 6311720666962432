//! In-memory remote document store.
//!
//! [`InMemoryRemote`] behaves like the remote backend: rows are keyed by
//! entity, fetches return rows changed after a watermark in ascending
//! `updated_at` order, and pushes overwrite rows. It implements
//! [`RemoteGateway`] for direct use and [`LoopbackServer`] so the same
//! store can sit behind an [`agrisync_engine::HttpGateway`].

use agrisync_engine::{HttpError, LoopbackServer, RemoteGateway, SyncError, SyncResult};
use agrisync_protocol::{
    EntityKey, EntityRecord, FetchRequest, FetchResponse, PushRequest, PushResponse, Timestamp,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A remote backend held in memory.
#[derive(Debug)]
pub struct InMemoryRemote {
    rows: Mutex<BTreeMap<EntityKey, EntityRecord>>,
    reachable: AtomicBool,
    ack_limit: Mutex<Option<u32>>,
    fetches: AtomicUsize,
    pushes: Mutex<Vec<(String, Vec<EntityRecord>)>>,
}

impl InMemoryRemote {
    /// Creates an empty, reachable remote.
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            reachable: AtomicBool::new(true),
            ack_limit: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    /// Writes a row as another client or the server would.
    pub fn insert(&self, record: EntityRecord) {
        let stored = remote_copy(record);
        self.rows.lock().insert(stored.key(), stored);
    }

    /// Returns a row.
    pub fn get(&self, entity_type: &str, entity_id: &str) -> Option<EntityRecord> {
        self.rows
            .lock()
            .get(&EntityKey::new(entity_type, entity_id))
            .cloned()
    }

    /// All rows of one type.
    pub fn all(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.rows
            .lock()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Total rows.
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if the remote holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulates losing or regaining the connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Caps how many rows of each push are accepted.
    pub fn set_ack_limit(&self, limit: Option<u32>) {
        *self.ack_limit.lock() = limit;
    }

    /// Number of fetch calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Every push received, with the rows as sent.
    pub fn pushes(&self) -> Vec<(String, Vec<EntityRecord>)> {
        self.pushes.lock().clone()
    }

    /// Rows changed after `since`, and whether more remain past `limit`.
    fn page(&self, entity_type: &str, since: Timestamp, limit: u32) -> (Vec<EntityRecord>, bool) {
        let mut rows: Vec<EntityRecord> = self
            .rows
            .lock()
            .values()
            .filter(|r| r.entity_type == entity_type && r.updated_at > since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        (rows, has_more)
    }

    fn check_reachable(&self) -> SyncResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn remote_copy(mut record: EntityRecord) -> EntityRecord {
    record.dirty = false;
    record.synced_at = None;
    record
}

impl RemoteGateway for InMemoryRemote {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        self.check_reachable()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.page(entity_type, since, limit).0)
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        self.check_reachable()?;
        self.pushes
            .lock()
            .push((entity_type.to_string(), records.to_vec()));

        let accepted = match *self.ack_limit.lock() {
            Some(limit) => records.len().min(limit as usize),
            None => records.len(),
        };
        let mut rows = self.rows.lock();
        for record in &records[..accepted] {
            let stored = remote_copy(record.clone());
            rows.insert(stored.key(), stored);
        }
        Ok(accepted as u32)
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

fn bad_request(message: impl Into<String>) -> HttpError {
    HttpError::Status {
        status: 400,
        message: message.into(),
    }
}

fn to_http(error: SyncError) -> HttpError {
    match error {
        SyncError::NotConnected => HttpError::Unreachable(error.to_string()),
        other => HttpError::Status {
            status: 500,
            message: other.to_string(),
        },
    }
}

impl LoopbackServer for InMemoryRemote {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpError> {
        let route = path
            .strip_prefix("/sync/")
            .and_then(|rest| rest.rsplit_once('/'));

        match route {
            Some((domain, "fetch")) => {
                let request = FetchRequest::decode(body).map_err(|e| bad_request(e.to_string()))?;
                if request.entity_type != domain {
                    return Err(bad_request("entity type does not match route"));
                }
                self.check_reachable().map_err(to_http)?;
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let (records, has_more) = self.page(domain, request.since, request.limit);
                FetchResponse { records, has_more }
                    .encode()
                    .map_err(|e| to_http(e.into()))
            }
            Some((domain, "push")) => {
                let request = PushRequest::decode(body).map_err(|e| bad_request(e.to_string()))?;
                if request.entity_type != domain {
                    return Err(bad_request("entity type does not match route"));
                }
                let acknowledged = self.push_batch(domain, &request.records).map_err(to_http)?;
                PushResponse { acknowledged }
                    .encode()
                    .map_err(|e| to_http(e.into()))
            }
            _ => Err(HttpError::Status {
                status: 404,
                message: format!("no route for {path}"),
            }),
        }
    }
}
