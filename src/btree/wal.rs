//! Write-ahead log of full page images.
//!
//! Before any page of a commit batch touches the page file, its
//! complete post-image is appended here and the log is fsynced. Replay
//! on open rewrites those images into the page file, which makes
//! recovery idempotent: applying the same image twice is harmless.
//!
//! # On-disk layout
//!
//! ```text
//! [pageId:u32 BE][pageSize:u32 BE][pageBytes:pageSize][crc32:u32 BE]
//! ...
//! ```
//!
//! The CRC-32 covers `(pageId, pageSize, pageBytes)` and is what
//! distinguishes a torn tail from a complete record: replay stops
//! cleanly at a short header, short payload, short checksum, or a
//! checksum mismatch. A page id or page size outside the sanity bounds
//! at a non-tail position is corruption and fails the replay.
//!
//! # Handle lifetime
//!
//! One append-mode handle for the engine's lifetime; nothing
//! coordinates concurrent opens of the same path. The single-writer
//! monitor above this type is the safety argument.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::btree::pagefile::{PageFile, PageFileError};

/// Upper sanity bound on a record's page size.
pub const MAX_PAGE_SIZE: usize = 1_000_000;

const RECORD_HEADER_LEN: usize = 8;
const CRC_LEN: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by page-WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PageWalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error writing a replayed image into the page file.
    #[error("page file error during replay: {0}")]
    PageFile(#[from] PageFileError),

    /// A record's page image exceeds the sanity bound.
    #[error("page image too large ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unsound page id or page size at a non-tail position.
    #[error("corrupt WAL record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

// ------------------------------------------------------------------------------------------------
// WAL core
// ------------------------------------------------------------------------------------------------

/// Append-only log of CRC-protected page images.
#[derive(Debug)]
pub struct PageWal {
    file: File,
    path: PathBuf,
}

impl PageWal {
    /// Opens (or creates) the WAL, holding one append-mode handle.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PageWalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        info!(path = %path.display(), len = file.metadata()?.len(), "page WAL opened");

        Ok(Self { file, path })
    }

    /// Appends one page image. Durability is deferred to [`PageWal::sync`]
    /// so a commit batch pays for a single fsync.
    pub fn append_page(&mut self, id: u32, bytes: &[u8]) -> Result<(), PageWalError> {
        if bytes.len() > MAX_PAGE_SIZE {
            return Err(PageWalError::RecordTooLarge(bytes.len()));
        }

        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + bytes.len() + CRC_LEN);
        buf.write_u32::<BigEndian>(id)?;
        buf.write_u32::<BigEndian>(bytes.len() as u32)?;
        buf.extend_from_slice(bytes);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.write_u32::<BigEndian>(hasher.finalize())?;

        self.file.write_all(&buf)?;

        trace!(page = id, len = bytes.len(), "page image appended");
        Ok(())
    }

    /// Forces appended records to disk.
    pub fn sync(&self) -> Result<(), PageWalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays all complete, checksummed records into the page file.
    ///
    /// Stops cleanly at a torn tail (short record or CRC mismatch).
    /// Returns the number of page images applied. The caller owns the
    /// follow-up page-file fsync and WAL reset.
    pub fn replay_into(&mut self, pages: &PageFile) -> Result<usize, PageWalError> {
        debug!(path = %self.path.display(), "page WAL replay started");

        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        let mut offset = 0usize;
        let mut applied = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < RECORD_HEADER_LEN {
                warn!(offset, "torn page-WAL tail (partial header), discarding");
                break;
            }

            let id = read_u32_be(&bytes[offset..]);
            let page_size = read_u32_be(&bytes[offset + 4..]) as usize;

            if id > i32::MAX as u32 {
                return Err(PageWalError::Corrupt {
                    offset: offset as u64,
                    reason: format!("page id {id} out of bounds"),
                });
            }
            if page_size == 0 || page_size > MAX_PAGE_SIZE {
                return Err(PageWalError::Corrupt {
                    offset: offset as u64,
                    reason: format!("page size {page_size} out of bounds"),
                });
            }
            if page_size != pages.page_size() {
                return Err(PageWalError::Corrupt {
                    offset: offset as u64,
                    reason: format!(
                        "record page size {page_size} does not match page file ({})",
                        pages.page_size()
                    ),
                });
            }

            if remaining < RECORD_HEADER_LEN + page_size + CRC_LEN {
                warn!(offset, "torn page-WAL tail (partial image), discarding");
                break;
            }

            let record_end = offset + RECORD_HEADER_LEN + page_size;
            let stored_crc = read_u32_be(&bytes[record_end..]);
            let mut hasher = Crc32::new();
            hasher.update(&bytes[offset..record_end]);
            if hasher.finalize() != stored_crc {
                warn!(offset, page = id, "torn page-WAL tail (checksum mismatch), discarding");
                break;
            }

            pages.write_page(id, &bytes[offset + RECORD_HEADER_LEN..record_end])?;
            applied += 1;
            offset = record_end + CRC_LEN;
        }

        info!(
            path = %self.path.display(),
            images = applied,
            "page WAL replay finished"
        );
        Ok(applied)
    }

    /// Truncates the log to zero bytes.
    pub fn reset(&mut self) -> Result<(), PageWalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;

        info!(path = %self.path.display(), "page WAL truncated");
        Ok(())
    }

    /// Current on-disk size in bytes.
    pub fn file_size(&self) -> Result<u64, PageWalError> {
        Ok(self.file.metadata()?.len())
    }
}

impl Drop for PageWal {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            tracing::error!(path = %self.path.display(), error = %e, "page WAL sync failed on drop");
        }
    }
}

fn read_u32_be(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}
