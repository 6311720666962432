//! # AgriSync Testkit
//!
//! Test utilities for AgriSync.
//!
//! This crate provides:
//! - Entity builders and a ready-wired [`TestHarness`]
//! - [`InMemoryRemote`], a remote document store usable directly or over
//!   the loopback HTTP client
//! - Fault-injecting gateways ([`FlakyGateway`], [`SlowGateway`])
//! - A [`CrashableBackend`] for torn-write recovery tests
//! - Property-based generators using proptest
//! - Concurrent queue stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agrisync_testkit::prelude::*;
//!
//! #[test]
//! fn pulls_new_rows() {
//!     let harness = TestHarness::new();
//!     harness.remote.insert(product("p-1", 100, 250));
//!     let orchestrator = harness.orchestrator(&["product"]);
//!     orchestrator.sync_all(1_000).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod gateways;
pub mod generators;
pub mod remote;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::gateways::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use gateways::*;
pub use generators::*;
pub use remote::*;
pub use stress::*;
