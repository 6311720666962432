//! Catalogue of the entity domains known to the engine.
//!
//! Hosts are free to register other domains; these names only drive the
//! built-in defaults (priority class, conflict strategy, sync order).

/// Entity type tags.
pub mod types {
    /// User profiles.
    pub const USER: &str = "user";
    /// Device-local preferences.
    pub const SETTINGS: &str = "settings";
    /// Farm assets (animals, plots, equipment).
    pub const FARM_ASSET: &str = "farm_asset";
    /// Marketplace products.
    pub const PRODUCT: &str = "product";
    /// Marketplace listings.
    pub const LISTING: &str = "listing";
    /// Purchase orders.
    pub const ORDER: &str = "order";
    /// Payments.
    pub const PAYMENT: &str = "payment";
    /// Ownership transfers.
    pub const TRANSFER: &str = "transfer";
    /// Supply-chain tracking events.
    pub const TRACKING_EVENT: &str = "tracking_event";
    /// Vaccination records.
    pub const VACCINATION: &str = "vaccination";
    /// Growth measurements.
    pub const GROWTH_RECORD: &str = "growth_record";
    /// Farm activity logs.
    pub const ACTIVITY_LOG: &str = "activity_log";
    /// Chat messages.
    pub const CHAT_MESSAGE: &str = "chat_message";
    /// In-app notifications.
    pub const NOTIFICATION: &str = "notification";
    /// Dashboard snapshots.
    pub const DASHBOARD: &str = "dashboard";
    /// Usage analytics.
    pub const ANALYTICS: &str = "analytics";
}

/// Standard sync order. Domains referenced by others come first
/// (user before product, product before transfer).
pub const STANDARD_DOMAIN_ORDER: &[&str] = &[
    types::USER,
    types::SETTINGS,
    types::FARM_ASSET,
    types::PRODUCT,
    types::LISTING,
    types::ORDER,
    types::PAYMENT,
    types::TRANSFER,
    types::TRACKING_EVENT,
    types::VACCINATION,
    types::GROWTH_RECORD,
    types::ACTIVITY_LOG,
    types::CHAT_MESSAGE,
    types::NOTIFICATION,
    types::DASHBOARD,
];

/// Domains whose local rows are caches of remote state and may be evicted
/// once stale.
pub const CACHE_DOMAINS: &[&str] = &[
    types::TRACKING_EVENT,
    types::CHAT_MESSAGE,
    types::NOTIFICATION,
    types::DASHBOARD,
];

/// Returns true if `entity_type` is a cache domain.
pub fn is_cache_domain(entity_type: &str) -> bool {
    CACHE_DOMAINS.contains(&entity_type)
}
