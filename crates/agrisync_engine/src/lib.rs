//! # AgriSync Engine
//!
//! Offline-first sync engine for AgriSync clients.
//!
//! This crate provides:
//! - [`SyncOrchestrator`]: per-domain pull → resolve → push → purge passes
//! - [`OfflineOperationQueue`]: durable, priority-ordered mutation queue
//! - [`PrioritySyncManager`]: deferred, constrained scheduling per priority class
//! - Collaborator traits ([`LocalStore`], [`RemoteGateway`], [`SyncStateStore`],
//!   [`DeviceMonitor`], [`TaskScheduler`], [`SyncObserver`]) with in-memory and
//!   journal-backed implementations
//! - [`HttpGateway`]: CBOR-over-HTTP remote gateway
//!
//! ## Architecture
//!
//! Each domain is synchronized **pull-then-push**:
//! 1. Pull remote rows changed since the domain watermark
//! 2. Resolve conflicts against dirty local rows
//! 3. Push local rows still dirty
//! 4. Purge acknowledged deletes and stale cache rows
//! 5. Advance the watermark
//!
//! Domains run sequentially in registration order, dependencies first.
//!
//! ## Key Invariants
//!
//! - The remote is authoritative unless a strategy says otherwise
//! - A failed domain never advances its watermark or blocks other domains
//! - Pulling the same page twice changes nothing
//! - A queued operation is claimed by at most one processor

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod device;
mod error;
mod gateway;
mod http;
mod observer;
mod orchestrator;
mod queue;
mod scheduler;
mod state;
mod store;

pub use config::{millis, RetryConfig, SchedulingPolicy, SyncConfig};
pub use device::{
    Constraints, DeviceConditions, DeviceMonitor, NetworkRequirement, NetworkState,
    StaticDeviceMonitor,
};
pub use error::{SyncError, SyncResult};
pub use gateway::{MockGateway, RemoteGateway};
pub use http::{HttpClient, HttpError, HttpGateway, LoopbackClient, LoopbackServer};
pub use observer::{ObservedEvent, RecordingObserver, SyncObserver, TracingObserver};
pub use orchestrator::{
    CancelHandle, DomainDescriptor, DomainFailure, DomainRegistry, LifetimeStats,
    PendingConflict, SyncOrchestrator, SyncPhase, SyncStats,
};
pub use queue::{OfflineOperationQueue, QueueFilter, QueueStats};
pub use scheduler::{
    ManualScheduler, PrioritySyncManager, RunReport, TaskScheduler, WorkOutcome, WorkRequest,
};
pub use state::{JournalSyncStateStore, MemorySyncStateStore, SyncState, SyncStateStore};
pub use store::{LocalStore, MemoryLocalStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
