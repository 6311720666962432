//! The syncable entity contract.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// The minimal shape every domain object exposes to take part in sync.
///
/// Domain structs implement this trait and are converted to an
/// [`EntityRecord`] with [`EntityRecord::from_entity`] before they reach
/// the engine.
pub trait SyncableEntity {
    /// Entity type tag, e.g. `"product"` or `"transfer"`.
    fn entity_type(&self) -> &str;

    /// Identifier, unique within the entity type.
    fn entity_id(&self) -> &str;

    /// Last write time, set by whichever side wrote last.
    fn updated_at(&self) -> Timestamp;

    /// Last confirmed round-trip time, if any.
    fn synced_at(&self) -> Option<Timestamp>;

    /// True when local changes have not been acknowledged by the remote.
    fn is_dirty(&self) -> bool;

    /// True when the entity is soft-deleted.
    fn is_deleted(&self) -> bool {
        false
    }
}

/// Identity of an entity across all domains.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type tag.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
}

impl EntityKey {
    /// Creates a new key.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Generic document representation of a syncable entity.
///
/// The engine only interprets the sync metadata; `fields` is the opaque
/// document body, compared field-by-field during merge resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity type tag.
    pub entity_type: String,
    /// Identifier, unique within the type.
    pub entity_id: String,
    /// Last write time.
    pub updated_at: Timestamp,
    /// Last confirmed round-trip time.
    pub synced_at: Option<Timestamp>,
    /// Local changes not yet acknowledged by the remote.
    pub dirty: bool,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted: bool,
    /// Document body.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl EntityRecord {
    /// Creates a clean record with an empty body.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            updated_at,
            synced_at: None,
            dirty: false,
            deleted: false,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field (builder style).
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Marks the record dirty (builder style).
    #[must_use]
    pub fn dirty(mut self) -> Self {
        self.dirty = true;
        self
    }

    /// Returns the identity of this record.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_type, &self.entity_id)
    }

    /// Returns a field value.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Records a local edit: sets the field, bumps `updated_at` and marks dirty.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>, now: Timestamp) {
        self.fields.insert(key.into(), value.into());
        self.touch(now);
    }

    /// Records a local soft delete.
    pub fn soft_delete(&mut self, now: Timestamp) {
        self.deleted = true;
        self.touch(now);
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
        self.dirty = true;
    }

    /// Names of body fields whose values differ between `self` and `other`.
    ///
    /// A field present on one side only counts as differing. The result is
    /// sorted because the body is a `BTreeMap`.
    pub fn differing_fields(&self, other: &EntityRecord) -> Vec<String> {
        let mut keys: Vec<&String> = self.fields.keys().chain(other.fields.keys()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .filter(|k| self.fields.get(*k) != other.fields.get(*k))
            .cloned()
            .collect()
    }

    /// True when both records carry the same version of the same content.
    ///
    /// Sync bookkeeping (`dirty`, `synced_at`) is ignored.
    pub fn same_version(&self, other: &EntityRecord) -> bool {
        self.entity_type == other.entity_type
            && self.entity_id == other.entity_id
            && self.updated_at == other.updated_at
            && self.deleted == other.deleted
            && self.fields == other.fields
    }

    /// Builds a record from a typed domain entity.
    ///
    /// The entity must serialize to a JSON object; its keys become the body.
    pub fn from_entity<T>(entity: &T) -> ProtocolResult<Self>
    where
        T: SyncableEntity + Serialize,
    {
        let conversion = |message: String| ProtocolError::Conversion {
            entity_type: entity.entity_type().to_string(),
            message,
        };
        let fields = match serde_json::to_value(entity).map_err(|e| conversion(e.to_string()))? {
            Value::Object(map) => map.into_iter().collect(),
            other => return Err(conversion(format!("expected an object, got {other}"))),
        };
        Ok(Self {
            entity_type: entity.entity_type().to_string(),
            entity_id: entity.entity_id().to_string(),
            updated_at: entity.updated_at(),
            synced_at: entity.synced_at(),
            dirty: entity.is_dirty(),
            deleted: entity.is_deleted(),
            fields,
        })
    }

    /// Deserializes the body into a typed domain entity.
    pub fn to_entity<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let object = Value::Object(self.fields.clone().into_iter().collect());
        serde_json::from_value(object).map_err(|e| ProtocolError::Conversion {
            entity_type: self.entity_type.clone(),
            message: e.to_string(),
        })
    }
}

impl SyncableEntity for EntityRecord {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn synced_at(&self) -> Option<Timestamp> {
        self.synced_at
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}
