//! Property-based test generators using proptest.

use agrisync_protocol::{ConflictStrategy, EntityRecord, SyncPriority, Timestamp};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// Strategy for entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}-[0-9]{1,4}"
}

/// Strategy for plausible timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    1i64..10_000_000
}

/// Strategy for a scalar field value.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z ]{0,12}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

/// Strategy for a document body.
pub fn fields_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-z_]{1,10}", field_value_strategy(), 0..6)
}

/// Strategy for a clean row of `entity_type`.
pub fn record_strategy(entity_type: &'static str) -> impl Strategy<Value = EntityRecord> {
    (entity_id_strategy(), timestamp_strategy(), fields_strategy(), any::<bool>()).prop_map(
        move |(id, updated_at, fields, deleted)| {
            let mut record = EntityRecord::new(entity_type, id, updated_at);
            record.fields = fields;
            record.deleted = deleted;
            record
        },
    )
}

/// Strategy for a dirty local row and a remote row of the same entity.
pub fn conflict_pair_strategy(
    entity_type: &'static str,
) -> impl Strategy<Value = (EntityRecord, EntityRecord)> {
    (
        record_strategy(entity_type),
        timestamp_strategy(),
        fields_strategy(),
    )
        .prop_map(|(local, remote_at, remote_fields)| {
            let mut remote = EntityRecord::new(&local.entity_type, &local.entity_id, remote_at);
            remote.fields = remote_fields;
            (local.dirty(), remote)
        })
}

/// Strategy for a page of remote rows with distinct ids, ascending by
/// `updated_at`.
pub fn remote_page_strategy(
    entity_type: &'static str,
    max: usize,
) -> impl Strategy<Value = Vec<EntityRecord>> {
    let rows = (timestamp_strategy(), fields_strategy());
    prop::collection::btree_map(entity_id_strategy(), rows, 0..max)
        .prop_map(move |rows| {
            let mut page: Vec<EntityRecord> = rows
                .into_iter()
                .map(|(id, (updated_at, fields))| {
                    let mut record = EntityRecord::new(entity_type, id, updated_at);
                    record.fields = fields;
                    record
                })
                .collect();
            page.sort_by(|a, b| {
                a.updated_at
                    .cmp(&b.updated_at)
                    .then_with(|| a.entity_id.cmp(&b.entity_id))
            });
            page
        })
}

/// Strategy for a priority class.
pub fn priority_strategy() -> impl Strategy<Value = SyncPriority> {
    prop::sample::select(SyncPriority::ALL.to_vec())
}

/// Strategy for a conflict strategy.
pub fn conflict_strategy_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop::sample::select(vec![
        ConflictStrategy::ServerWins,
        ConflictStrategy::ClientWins,
        ConflictStrategy::NewestWins,
        ConflictStrategy::Merge,
        ConflictStrategy::Manual,
    ])
}
