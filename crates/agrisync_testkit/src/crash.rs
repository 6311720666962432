//! Crash simulation for journal-backed components.
//!
//! [`CrashableBackend`] wraps a backend and starts failing writes after a
//! byte budget, keeping whatever partial frame made it to storage. Reopen
//! the wrapped backend afterwards to check recovery.
//!
//! ```rust,ignore
//! let disk = InMemoryBackend::new();
//! let backend = CrashableBackend::new(disk.clone());
//! backend.crash_after(40);
//! // ... write until an error surfaces ...
//! let queue = OfflineOperationQueue::open(Box::new(disk))?;
//! ```

use agrisync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A backend that can be told to crash mid-write.
///
/// Clones share the crash controls.
#[derive(Debug, Clone)]
pub struct CrashableBackend<B = InMemoryBackend> {
    inner: B,
    controls: Arc<Controls>,
}

#[derive(Debug)]
struct Controls {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
}

impl<B: StorageBackend> CrashableBackend<B> {
    /// Wraps `inner`.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            controls: Arc::new(Controls {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.controls.bytes_written.load(Ordering::SeqCst);
        self.controls
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes `sync` fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.controls.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns true once a simulated crash happened.
    pub fn has_crashed(&self) -> bool {
        self.controls.crashed.load(Ordering::SeqCst)
    }

    /// Clears the crash state.
    pub fn reset(&self) {
        self.controls.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.controls.crashed.store(false, Ordering::SeqCst);
        self.controls.fail_on_sync.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(simulated("write after crash"));
        }
        Ok(())
    }
}

impl<B: StorageBackend> StorageBackend for CrashableBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check()?;
        let current = self.controls.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.controls.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(data.len()) > threshold {
            self.controls.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(simulated("append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check()?;
        if self.controls.fail_on_sync.load(Ordering::SeqCst) {
            self.controls.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check()?;
        self.inner.truncate(new_size)
    }

    fn replace_all(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check()?;
        let written = self.controls.bytes_written.load(Ordering::SeqCst);
        let limit = self.controls.crash_after_bytes.load(Ordering::SeqCst);
        if written.saturating_add(data.len()) > limit {
            // Replacement is atomic: a crash leaves the old contents.
            self.controls.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("replace"));
        }
        self.inner.replace_all(data)
    }
}
