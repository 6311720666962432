//! Local store abstraction and an in-memory implementation.

use crate::error::SyncResult;
use agrisync_protocol::{EntityKey, EntityRecord, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// The device-local embedded store, as the engine sees it.
///
/// The engine only touches the sync metadata (`dirty`, `updated_at`,
/// `synced_at`) and whole-row replacement of pulled versions.
pub trait LocalStore: Send + Sync {
    /// Looks up one row.
    fn find(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<EntityRecord>>;

    /// Dirty rows of `entity_type` with `updated_at > since`, ascending by
    /// `updated_at`, at most `limit` of them.
    fn find_changed_since(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>>;

    /// Inserts or replaces rows. Returns how many rows changed.
    fn upsert_all(&self, records: &[EntityRecord]) -> SyncResult<usize>;

    /// Marks pushed rows as synced.
    ///
    /// A row is updated only if its `updated_at` still equals the pushed
    /// version; rows edited since the push stay dirty. Updated rows get
    /// `dirty = false`, `synced_at = now` and `updated_at = now`.
    fn mark_synced(
        &self,
        entity_type: &str,
        versions: &[(String, Timestamp)],
        now: Timestamp,
    ) -> SyncResult<usize>;

    /// Deletes soft-deleted rows whose deletion the remote acknowledged.
    fn purge_soft_deleted(&self, entity_type: &str) -> SyncResult<usize>;

    /// Evicts clean rows last written before `threshold`, except rows
    /// referenced by an active tracking or ownership chain.
    fn purge_stale_before(&self, entity_type: &str, threshold: Timestamp) -> SyncResult<usize>;
}

/// An in-memory [`LocalStore`].
///
/// Rows can be pinned to model references from active tracking or
/// ownership chains; pinned rows are never evicted as stale.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    rows: RwLock<BTreeMap<EntityKey, EntityRecord>>,
    pinned: RwLock<BTreeSet<EntityKey>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row as a host repository would (no sync bookkeeping).
    pub fn put(&self, record: EntityRecord) {
        self.rows.write().insert(record.key(), record);
    }

    /// Returns one row.
    pub fn get(&self, entity_type: &str, entity_id: &str) -> Option<EntityRecord> {
        self.rows
            .read()
            .get(&EntityKey::new(entity_type, entity_id))
            .cloned()
    }

    /// Applies a local edit to an existing row.
    pub fn edit<F>(&self, entity_type: &str, entity_id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut EntityRecord),
    {
        match self.rows.write().get_mut(&EntityKey::new(entity_type, entity_id)) {
            Some(row) => {
                edit(row);
                true
            }
            None => false,
        }
    }

    /// Protects a row from stale eviction.
    pub fn pin(&self, entity_type: &str, entity_id: &str) {
        self.pinned.write().insert(EntityKey::new(entity_type, entity_id));
    }

    /// Removes a pin.
    pub fn unpin(&self, entity_type: &str, entity_id: &str) {
        self.pinned.write().remove(&EntityKey::new(entity_type, entity_id));
    }

    /// All rows of one type, ordered by id.
    pub fn all(&self, entity_type: &str) -> Vec<EntityRecord> {
        self.rows
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Total row count.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl LocalStore for MemoryLocalStore {
    fn find(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<EntityRecord>> {
        Ok(self.get(entity_type, entity_id))
    }

    fn find_changed_since(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        let mut changed: Vec<EntityRecord> = self
            .rows
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && r.dirty && r.updated_at > since)
            .cloned()
            .collect();
        changed.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        changed.truncate(limit as usize);
        Ok(changed)
    }

    fn upsert_all(&self, records: &[EntityRecord]) -> SyncResult<usize> {
        let mut rows = self.rows.write();
        let mut changed = 0;
        for record in records {
            let key = record.key();
            if rows.get(&key) != Some(record) {
                rows.insert(key, record.clone());
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn mark_synced(
        &self,
        entity_type: &str,
        versions: &[(String, Timestamp)],
        now: Timestamp,
    ) -> SyncResult<usize> {
        let mut rows = self.rows.write();
        let mut marked = 0;
        for (entity_id, pushed_at) in versions {
            let key = EntityKey::new(entity_type, entity_id.as_str());
            if let Some(row) = rows.get_mut(&key) {
                if row.updated_at == *pushed_at {
                    row.dirty = false;
                    row.synced_at = Some(now);
                    row.updated_at = now;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    fn purge_soft_deleted(&self, entity_type: &str) -> SyncResult<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, r| {
            !(r.entity_type == entity_type && r.deleted && !r.dirty && r.synced_at.is_some())
        });
        Ok(before - rows.len())
    }

    fn purge_stale_before(&self, entity_type: &str, threshold: Timestamp) -> SyncResult<usize> {
        let pinned = self.pinned.read();
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|key, r| {
            let stale = r.entity_type == entity_type && !r.dirty && r.updated_at < threshold;
            !stale || pinned.contains(key)
        });
        Ok(before - rows.len())
    }
}
