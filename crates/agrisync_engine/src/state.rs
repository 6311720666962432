//! Sync watermarks and their persistence.

use crate::error::SyncResult;
use agrisync_protocol::{from_cbor, to_cbor, Timestamp};
use agrisync_storage::{FileBackend, Journal, StorageBackend};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-device sync progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Device the state belongs to.
    pub device_id: String,
    /// Per-domain watermark: remote changes at or below it are already pulled.
    pub watermarks: BTreeMap<String, Timestamp>,
    /// Start time of the last pass.
    pub last_pass_at: Option<Timestamp>,
    /// True if every domain in the last pass succeeded.
    pub last_pass_ok: bool,
}

impl SyncState {
    /// Creates an empty state for `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Watermark for `domain`, or 0 if it never synced.
    pub fn watermark(&self, domain: &str) -> Timestamp {
        self.watermarks.get(domain).copied().unwrap_or(0)
    }

    /// Moves the watermark forward. Never moves it back.
    ///
    /// Returns the resulting watermark.
    pub fn advance(&mut self, domain: &str, value: Timestamp) -> Timestamp {
        let current = self.watermarks.entry(domain.to_string()).or_insert(0);
        if value > *current {
            *current = value;
        }
        *current
    }
}

/// Persistence for [`SyncState`].
///
/// `upsert` replaces the whole state in one write, so a domain's watermark
/// lands together with the pass metadata.
pub trait SyncStateStore: Send + Sync {
    /// Loads the current state.
    fn get(&self) -> SyncResult<SyncState>;

    /// Replaces the state.
    fn upsert(&self, state: &SyncState) -> SyncResult<()>;
}

/// An in-memory [`SyncStateStore`].
#[derive(Debug, Default)]
pub struct MemorySyncStateStore {
    state: RwLock<SyncState>,
}

impl MemorySyncStateStore {
    /// Creates a store holding `state`.
    pub fn new(state: SyncState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

impl SyncStateStore for MemorySyncStateStore {
    fn get(&self) -> SyncResult<SyncState> {
        Ok(self.state.read().clone())
    }

    fn upsert(&self, state: &SyncState) -> SyncResult<()> {
        *self.state.write() = state.clone();
        Ok(())
    }
}

/// Journal records kept before the state journal is compacted.
const COMPACT_AFTER: u64 = 64;

/// A [`SyncStateStore`] persisted as a journal of full snapshots.
///
/// The last intact snapshot wins on open, so a torn write falls back to the
/// previous state rather than losing all watermarks.
#[derive(Debug)]
pub struct JournalSyncStateStore {
    inner: Mutex<(Journal, SyncState)>,
}

impl JournalSyncStateStore {
    /// Opens the store over `backend`, creating `device_id`'s state if empty.
    pub fn open(backend: Box<dyn StorageBackend>, device_id: &str) -> SyncResult<Self> {
        let (journal, recovery) = Journal::open(backend)?;
        let state = match recovery.records.last() {
            Some(bytes) => from_cbor(bytes)?,
            None => SyncState::new(device_id),
        };
        tracing::debug!(
            snapshots = recovery.records.len(),
            domains = state.watermarks.len(),
            "sync state loaded"
        );
        Ok(Self {
            inner: Mutex::new((journal, state)),
        })
    }

    /// Opens a file-backed store at `path`.
    pub fn open_file(path: &Path, device_id: &str) -> SyncResult<Self> {
        Self::open(Box::new(FileBackend::open(path)?), device_id)
    }
}

impl SyncStateStore for JournalSyncStateStore {
    fn get(&self) -> SyncResult<SyncState> {
        Ok(self.inner.lock().1.clone())
    }

    fn upsert(&self, state: &SyncState) -> SyncResult<()> {
        let bytes = to_cbor(state)?;
        let mut guard = self.inner.lock();
        let (journal, current) = &mut *guard;
        if journal.record_count() >= COMPACT_AFTER {
            journal.rewrite([bytes.as_slice()])?;
        } else {
            journal.append(&bytes)?;
        }
        *current = state.clone();
        Ok(())
    }
}
