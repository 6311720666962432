//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-backed store.
///
/// Appends go to the end of a single file. [`StorageBackend::replace_all`]
/// writes a sibling `*.tmp` file, syncs it and renames it over the original,
/// so a crash leaves either the old or the new contents.
///
/// # Example
///
/// ```no_run
/// use agrisync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("queue.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path`, creating parent directories.
    ///
    /// A leftover `*.tmp` sibling from an interrupted rewrite is removed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(path);
        if tmp.exists() {
            tracing::warn!(path = %tmp.display(), "removing interrupted rewrite");
            fs::remove_file(&tmp)?;
        }

        let file = open_file(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_file(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if data.is_empty() {
            return Ok(offset);
        }
        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size: inner.size,
            });
        }
        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }

    fn replace_all(&mut self, data: &[u8]) -> StorageResult<()> {
        let tmp = temp_path(&self.path);
        {
            let mut staged = File::create(&tmp)?;
            staged.write_all(data)?;
            staged.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent(&self.path)?;

        let file = open_file(&self.path)?;
        let inner = self.inner.get_mut();
        inner.file = file;
        inner.size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_read_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.journal");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.append(b"hello").unwrap(), 0);
            assert_eq!(backend.append(b" world").unwrap(), 5);
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert!(backend.read_at(8, 10).is_err());
    }

    #[test]
    fn replace_all_swaps_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.journal");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"old contents that are long").unwrap();
        backend.replace_all(b"new").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"new");

        backend.append(b"er").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"newer");
        assert!(!temp_path(&path).exists());

        drop(backend);
        assert_eq!(fs::read(&path).unwrap(), b"newer");
    }

    #[test]
    fn stale_temp_file_is_removed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.journal");
        fs::write(temp_path(&path), b"half written").unwrap();

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.journal");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"0123456789").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"0123");
        assert!(backend.truncate(9).is_err());
    }
}
