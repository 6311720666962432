//! Checksummed append-only record journal.
//!
//! Each record is framed as:
//!
//! ```text
//! | magic "AGSJ" (4) | len u32 LE (4) | payload (len) | crc32 u32 LE (4) |
//! ```
//!
//! The CRC covers the length field and the payload. On open, a damaged or
//! incomplete final frame is treated as a torn write and cut off; damage
//! anywhere before the final frame is reported as corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Frame magic.
pub const JOURNAL_MAGIC: [u8; 4] = *b"AGSJ";

/// Bytes before the payload.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Bytes after the payload.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Computes a CRC-32 (IEEE) checksum.
pub fn checksum(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

fn encode_frame(payload: &[u8], out: &mut Vec<u8>) {
    let len = (payload.len() as u32).to_le_bytes();
    let mut crc_input = Vec::with_capacity(4 + payload.len());
    crc_input.extend_from_slice(&len);
    crc_input.extend_from_slice(payload);

    out.extend_from_slice(&JOURNAL_MAGIC);
    out.extend_from_slice(&len);
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum(&crc_input).to_le_bytes());
}

/// What [`Journal::open`] found.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Intact record payloads, in append order.
    pub records: Vec<Vec<u8>>,
    /// Bytes cut off the tail.
    pub discarded_bytes: u64,
}

/// Scans framed bytes. Returns the payloads and the length of the valid
/// prefix.
fn scan(bytes: &[u8], max_record_size: usize) -> StorageResult<(Vec<Vec<u8>>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let corrupted = |reason: &str| StorageError::Corrupted {
            offset: offset as u64,
            reason: reason.to_string(),
        };

        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }
        if rest[..4] != JOURNAL_MAGIC {
            if rest.iter().all(|b| *b == 0) {
                break;
            }
            return Err(corrupted("bad magic"));
        }

        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        if len > max_record_size {
            return Err(corrupted("record length exceeds limit"));
        }
        let frame_len = FRAME_HEADER_SIZE + len + FRAME_TRAILER_SIZE;
        if rest.len() < frame_len {
            break;
        }

        let trailer = &rest[FRAME_HEADER_SIZE + len..frame_len];
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if checksum(&rest[4..FRAME_HEADER_SIZE + len]) != stored {
            if rest.len() == frame_len {
                break;
            }
            return Err(corrupted("checksum mismatch"));
        }

        records.push(rest[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec());
        offset += frame_len;
    }

    Ok((records, offset))
}

/// Append-only journal of opaque records over a [`StorageBackend`].
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    max_record_size: usize,
    sync_on_append: bool,
    record_count: u64,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("max_record_size", &self.max_record_size)
            .field("sync_on_append", &self.sync_on_append)
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl Journal {
    /// Opens a journal, replaying and returning every intact record.
    ///
    /// A torn tail is truncated away before the journal accepts appends.
    pub fn open(backend: Box<dyn StorageBackend>) -> StorageResult<(Self, Recovery)> {
        Self::open_with_limit(backend, DEFAULT_MAX_RECORD_SIZE)
    }

    /// Like [`open`](Self::open) with a custom record size limit.
    pub fn open_with_limit(
        mut backend: Box<dyn StorageBackend>,
        max_record_size: usize,
    ) -> StorageResult<(Self, Recovery)> {
        let bytes = backend.read_all()?;
        let (records, valid_len) = scan(&bytes, max_record_size)?;

        let discarded = (bytes.len() - valid_len) as u64;
        if discarded > 0 {
            tracing::warn!(
                valid_len,
                discarded,
                "journal has a torn tail, truncating"
            );
            backend.truncate(valid_len as u64)?;
            backend.sync()?;
        }

        let journal = Self {
            backend,
            max_record_size,
            sync_on_append: true,
            record_count: records.len() as u64,
        };
        Ok((
            journal,
            Recovery {
                records,
                discarded_bytes: discarded,
            },
        ))
    }

    /// Disables `sync` after each append. Appends are still flushed.
    #[must_use]
    pub fn without_sync(mut self) -> Self {
        self.sync_on_append = false;
        self
    }

    /// Appends one record.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        self.append_batch(&[payload])
    }

    /// Appends several records with a single backend write.
    ///
    /// Returns the offset of the first frame.
    pub fn append_batch(&mut self, payloads: &[&[u8]]) -> StorageResult<u64> {
        let mut buffer = Vec::new();
        for payload in payloads {
            self.check_size(payload)?;
            encode_frame(payload, &mut buffer);
        }

        let offset = self.backend.append(&buffer)?;
        self.backend.flush()?;
        if self.sync_on_append {
            self.backend.sync()?;
        }
        self.record_count += payloads.len() as u64;
        Ok(offset)
    }

    /// Atomically replaces the journal with exactly `payloads`.
    pub fn rewrite<'a, I>(&mut self, payloads: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buffer = Vec::new();
        let mut count = 0u64;
        for payload in payloads {
            self.check_size(payload)?;
            encode_frame(payload, &mut buffer);
            count += 1;
        }

        let before = self.backend.size()?;
        self.backend.replace_all(&buffer)?;
        tracing::debug!(
            before,
            after = buffer.len(),
            records = count,
            "journal compacted"
        );
        self.record_count = count;
        Ok(())
    }

    /// Records currently in the journal.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Journal size in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    fn check_size(&self, payload: &[u8]) -> StorageResult<()> {
        if payload.len() > self.max_record_size {
            return Err(StorageError::RecordTooLarge {
                len: payload.len(),
                max: self.max_record_size,
            });
        }
        Ok(())
    }
}
