//! Entity builders and a pre-wired sync harness.

use crate::remote::InMemoryRemote;
use agrisync_engine::{
    DomainDescriptor, DomainRegistry, MemoryLocalStore, MemorySyncStateStore, RecordingObserver,
    RetryConfig, StaticDeviceMonitor, SyncConfig, SyncOrchestrator, SyncStateStore,
};
use agrisync_protocol::domain::types;
use agrisync_protocol::{EntityRecord, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Device id used by harness orchestrators.
pub const TEST_DEVICE: &str = "test-device";

/// A clean product row with a price.
pub fn product(id: &str, updated_at: Timestamp, price: i64) -> EntityRecord {
    EntityRecord::new(types::PRODUCT, id, updated_at)
        .with_field("name", format!("Product {id}"))
        .with_field("price", price)
}

/// A clean transfer row with a status.
pub fn transfer(id: &str, updated_at: Timestamp, status: &str) -> EntityRecord {
    EntityRecord::new(types::TRANSFER, id, updated_at)
        .with_field("status", status)
        .with_field("amount", 1_000)
}

/// A clean vaccination row.
pub fn vaccination(id: &str, updated_at: Timestamp, dose: i64, notes: &str) -> EntityRecord {
    EntityRecord::new(types::VACCINATION, id, updated_at)
        .with_field("dose", dose)
        .with_field("notes", notes)
}

/// Default config for harness orchestrators: no retry sleeps.
pub fn test_config() -> SyncConfig {
    SyncConfig::new(TEST_DEVICE).with_retry(RetryConfig::no_retry())
}

/// One local store, one remote, one state store, wired together.
pub struct TestHarness {
    /// Local rows.
    pub store: Arc<MemoryLocalStore>,
    /// Remote rows.
    pub remote: Arc<InMemoryRemote>,
    /// Watermarks.
    pub state: Arc<MemorySyncStateStore>,
    /// Device conditions, online by default.
    pub device: Arc<StaticDeviceMonitor>,
    /// Captured engine events.
    pub observer: Arc<RecordingObserver>,
}

impl TestHarness {
    /// Creates an empty harness.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(InMemoryRemote::new()),
            state: Arc::new(MemorySyncStateStore::default()),
            device: Arc::new(StaticDeviceMonitor::default()),
            observer: Arc::new(RecordingObserver::new()),
        }
    }

    /// A descriptor for `name` bound to the harness store and remote.
    pub fn domain(&self, name: &str) -> DomainDescriptor {
        DomainDescriptor::new(name, self.store.clone(), self.remote.clone())
    }

    /// An orchestrator over `domains`, in order.
    pub fn orchestrator(&self, domains: &[&str]) -> SyncOrchestrator {
        self.orchestrator_with(test_config(), domains.iter().map(|d| self.domain(d)).collect())
    }

    /// An orchestrator with a custom config and descriptors.
    pub fn orchestrator_with(
        &self,
        config: SyncConfig,
        domains: Vec<DomainDescriptor>,
    ) -> SyncOrchestrator {
        let mut registry = DomainRegistry::new();
        for domain in domains {
            registry.register(domain);
        }
        SyncOrchestrator::new(config, registry, self.state.clone())
            .with_device_monitor(self.device.clone())
            .with_observer(self.observer.clone())
    }

    /// Current watermark for `domain`.
    pub fn watermark(&self, domain: &str) -> Timestamp {
        self.state
            .get()
            .expect("memory state store never fails")
            .watermark(domain)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A temporary directory for journal files, removed on drop.
pub struct TempJournalDir {
    dir: TempDir,
}

impl TempJournalDir {
    /// Creates a new directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of a journal file inside the directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for TempJournalDir {
    fn default() -> Self {
        Self::new()
    }
}
