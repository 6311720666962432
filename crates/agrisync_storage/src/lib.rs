//! # AgriSync Storage
//!
//! Durable byte stores for the AgriSync sync engine.
//!
//! Backends are **opaque byte stores**; the [`Journal`] layers checksummed
//! record framing on top and is what the engine's durable queue and
//! watermark store are built on.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral sessions
//! - [`FileBackend`] - Persistent storage with atomic whole-file rewrite
//!
//! ## Example
//!
//! ```rust
//! use agrisync_storage::{InMemoryBackend, Journal};
//!
//! let backend = InMemoryBackend::new();
//! let (mut journal, _) = Journal::open(Box::new(backend.clone())).unwrap();
//! journal.append(b"hello").unwrap();
//!
//! let (_, recovery) = Journal::open(Box::new(backend)).unwrap();
//! assert_eq!(recovery.records, vec![b"hello".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::{
    checksum, Journal, Recovery, DEFAULT_MAX_RECORD_SIZE, FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE,
    JOURNAL_MAGIC,
};
pub use memory::InMemoryBackend;
