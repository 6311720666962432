//! Conflict detection and resolution.
//!
//! The resolver is a pure decision function: it never touches storage. The
//! caller persists the chosen value and clears the dirty flag.

use crate::domain::types;
use crate::entity::EntityRecord;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Fields whose divergence always needs a human decision under [`ConflictStrategy::Merge`].
pub const IMPORTANT_FIELDS: &[&str] = &[
    "status",
    "quantity",
    "price",
    "amount",
    "paymentStatus",
    "healthStatus",
    "administeredAt",
];

/// Maximum number of non-important differing fields a merge may discard.
pub const MAX_AUTO_MERGE_FIELDS: usize = 2;

/// Pseudo field reported when only one side is soft-deleted.
pub const DELETED_MARKER: &str = "_deleted";

/// Strategy for resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Remote version always wins.
    ServerWins,
    /// Local version always wins.
    ClientWins,
    /// Larger `updated_at` wins; ties go to the remote.
    NewestWins,
    /// Field-by-field comparison, escalating important or wide divergence.
    Merge,
    /// Always defer to the user.
    Manual,
}

impl ConflictStrategy {
    /// Returns true if this strategy can resolve without the user.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }

    /// Default strategy for an entity type.
    pub fn for_entity_type(entity_type: &str) -> Self {
        match entity_type {
            types::ORDER | types::TRANSFER | types::PAYMENT => ConflictStrategy::ServerWins,
            types::PRODUCT | types::LISTING | types::FARM_ASSET => ConflictStrategy::NewestWins,
            types::VACCINATION | types::GROWTH_RECORD | types::ACTIVITY_LOG => {
                ConflictStrategy::Merge
            }
            types::SETTINGS => ConflictStrategy::ClientWins,
            _ => ConflictStrategy::ServerWins,
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictStrategy::ServerWins => 1,
            ConflictStrategy::ClientWins => 2,
            ConflictStrategy::NewestWins => 3,
            ConflictStrategy::Merge => 4,
            ConflictStrategy::Manual => 5,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(ConflictStrategy::ServerWins),
            2 => Ok(ConflictStrategy::ClientWins),
            3 => Ok(ConflictStrategy::NewestWins),
            4 => Ok(ConflictStrategy::Merge),
            5 => Ok(ConflictStrategy::Manual),
            _ => Err(ProtocolError::UnknownCode {
                kind: "conflict strategy",
                code,
            }),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::ServerWins => "SERVER_WINS",
            ConflictStrategy::ClientWins => "CLIENT_WINS",
            ConflictStrategy::NewestWins => "NEWEST_WINS",
            ConflictStrategy::Merge => "MERGE",
            ConflictStrategy::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

/// Which side of a conflict was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Winner {
    /// The local version; it still has to be pushed.
    Local,
    /// The remote version; the local row becomes clean.
    Remote,
}

/// Outcome of resolving one conflicting pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResult {
    /// Automatically resolved.
    Resolved {
        /// The version to keep.
        value: EntityRecord,
        /// Strategy that produced the decision.
        strategy: ConflictStrategy,
        /// Side the value came from.
        winner: Winner,
    },
    /// Needs an external decision; both versions are left intact.
    NeedsUserInput {
        /// Local version.
        local: EntityRecord,
        /// Remote version.
        remote: EntityRecord,
        /// Differing body fields, sorted.
        conflicting_fields: Vec<String>,
    },
    /// The pair could not be compared.
    Error(String),
}

impl ConflictResult {
    /// Returns true for [`ConflictResult::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, ConflictResult::Resolved { .. })
    }

    /// Returns true for [`ConflictResult::NeedsUserInput`].
    pub fn needs_user_input(&self) -> bool {
        matches!(self, ConflictResult::NeedsUserInput { .. })
    }
}

/// Chooses between a local and a remote version of the same entity.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    overrides: HashMap<String, ConflictStrategy>,
    important_fields: BTreeSet<String>,
    max_auto_merge_fields: usize,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            important_fields: IMPORTANT_FIELDS.iter().map(|f| (*f).to_string()).collect(),
            max_auto_merge_fields: MAX_AUTO_MERGE_FIELDS,
        }
    }
}

impl ConflictResolver {
    /// Creates a resolver with the default per-type strategies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the strategy for one entity type.
    #[must_use]
    pub fn with_override(
        mut self,
        entity_type: impl Into<String>,
        strategy: ConflictStrategy,
    ) -> Self {
        self.overrides.insert(entity_type.into(), strategy);
        self
    }

    /// Adds a field to the important set.
    #[must_use]
    pub fn with_important_field(mut self, field: impl Into<String>) -> Self {
        self.important_fields.insert(field.into());
        self
    }

    /// Strategy used for `entity_type` when none is passed to [`resolve`](Self::resolve).
    pub fn strategy_for(&self, entity_type: &str) -> ConflictStrategy {
        self.overrides
            .get(entity_type)
            .copied()
            .unwrap_or_else(|| ConflictStrategy::for_entity_type(entity_type))
    }

    /// Resolves a conflict between `local` and `remote`.
    ///
    /// `strategy` takes precedence over the per-type default.
    pub fn resolve(
        &self,
        local: &EntityRecord,
        remote: &EntityRecord,
        strategy: Option<ConflictStrategy>,
    ) -> ConflictResult {
        if local.entity_type != remote.entity_type || local.entity_id != remote.entity_id {
            return ConflictResult::Error(format!(
                "cannot resolve {} against {}",
                local.key(),
                remote.key()
            ));
        }

        let strategy = strategy.unwrap_or_else(|| self.strategy_for(&local.entity_type));
        match strategy {
            ConflictStrategy::ServerWins => resolved(remote, strategy, Winner::Remote),
            ConflictStrategy::ClientWins => resolved(local, strategy, Winner::Local),
            ConflictStrategy::NewestWins => newest(local, remote, strategy),
            ConflictStrategy::Manual => ConflictResult::NeedsUserInput {
                local: local.clone(),
                remote: remote.clone(),
                conflicting_fields: differing(local, remote),
            },
            ConflictStrategy::Merge => self.merge(local, remote),
        }
    }

    fn merge(&self, local: &EntityRecord, remote: &EntityRecord) -> ConflictResult {
        let fields = differing(local, remote);
        let touches_important = fields
            .iter()
            .any(|f| f == DELETED_MARKER || self.important_fields.contains(f));

        if touches_important || fields.len() > self.max_auto_merge_fields {
            return ConflictResult::NeedsUserInput {
                local: local.clone(),
                remote: remote.clone(),
                conflicting_fields: fields,
            };
        }

        let result = newest(local, remote, ConflictStrategy::Merge);
        if !fields.is_empty() {
            if let ConflictResult::Resolved { winner, .. } = &result {
                tracing::debug!(
                    entity = %local.key(),
                    kept = ?winner,
                    discarded = ?fields,
                    "merge discarded fields from older version"
                );
            }
        }
        result
    }
}

fn differing(local: &EntityRecord, remote: &EntityRecord) -> Vec<String> {
    let mut fields = local.differing_fields(remote);
    if local.deleted != remote.deleted {
        fields.insert(0, DELETED_MARKER.to_string());
    }
    fields
}

fn newest(
    local: &EntityRecord,
    remote: &EntityRecord,
    strategy: ConflictStrategy,
) -> ConflictResult {
    if local.updated_at > remote.updated_at {
        resolved(local, strategy, Winner::Local)
    } else {
        resolved(remote, strategy, Winner::Remote)
    }
}

fn resolved(value: &EntityRecord, strategy: ConflictStrategy, winner: Winner) -> ConflictResult {
    ConflictResult::Resolved {
        value: value.clone(),
        strategy,
        winner,
    }
}
