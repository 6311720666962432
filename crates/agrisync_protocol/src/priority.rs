//! Priority classes for queued operations and scheduled sync work.

use crate::domain::types;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse urgency bucket. Lower ordinal drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPriority {
    /// Financial and ownership data.
    Critical,
    /// User-visible marketplace and messaging data.
    High,
    /// Farm records and profiles.
    Normal,
    /// Derived views.
    Low,
    /// Preferences and telemetry.
    Background,
}

impl SyncPriority {
    /// All classes, most urgent first.
    pub const ALL: [SyncPriority; 5] = [
        SyncPriority::Critical,
        SyncPriority::High,
        SyncPriority::Normal,
        SyncPriority::Low,
        SyncPriority::Background,
    ];

    /// Returns the ordinal (0 = most urgent).
    pub fn ordinal(self) -> u8 {
        match self {
            SyncPriority::Critical => 0,
            SyncPriority::High => 1,
            SyncPriority::Normal => 2,
            SyncPriority::Low => 3,
            SyncPriority::Background => 4,
        }
    }

    /// Converts from an ordinal.
    pub fn from_ordinal(ordinal: u8) -> Result<Self, ProtocolError> {
        Self::ALL
            .get(usize::from(ordinal))
            .copied()
            .ok_or(ProtocolError::UnknownCode {
                kind: "priority",
                code: ordinal,
            })
    }

    /// Static entity-type → priority map.
    pub fn for_entity_type(entity_type: &str) -> Self {
        match entity_type {
            types::ORDER | types::TRANSFER | types::PAYMENT => SyncPriority::Critical,
            types::PRODUCT | types::LISTING | types::TRACKING_EVENT | types::CHAT_MESSAGE => {
                SyncPriority::High
            }
            types::USER
            | types::FARM_ASSET
            | types::VACCINATION
            | types::GROWTH_RECORD
            | types::ACTIVITY_LOG => SyncPriority::Normal,
            types::DASHBOARD | types::NOTIFICATION => SyncPriority::Low,
            types::SETTINGS | types::ANALYTICS => SyncPriority::Background,
            _ => SyncPriority::Normal,
        }
    }

    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPriority::Critical => "critical",
            SyncPriority::High => "high",
            SyncPriority::Normal => "normal",
            SyncPriority::Low => "low",
            SyncPriority::Background => "background",
        }
    }
}

impl fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
