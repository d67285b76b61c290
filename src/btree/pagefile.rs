//! Random-access file of fixed-size pages.
//!
//! Page `id` lives at byte offset `id · pageSize`. Pages are created by
//! the allocator, rewritten in place, and never deleted. Reads and
//! writes use positional I/O on one long-lived handle; the engine's
//! monitor serializes access.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by page-file operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PageFileError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested page lies past end-of-file.
    #[error("page {id} does not exist")]
    MissingPage { id: u32 },

    /// `write_page` was handed a buffer that is not one page long.
    #[error("page buffer is {got} bytes, expected {expected}")]
    BadBufferLen { expected: usize, got: usize },
}

// ------------------------------------------------------------------------------------------------
// PageFile core
// ------------------------------------------------------------------------------------------------

/// One long-lived handle over the page file.
#[derive(Debug)]
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl PageFile {
    /// Opens (or creates) the page file.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self, PageFileError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        info!(path = %path.display(), page_size, "page file opened");

        Ok(Self {
            file,
            path,
            page_size,
        })
    }

    /// Reads exactly one page. A short read means the page was never
    /// written and is reported as [`PageFileError::MissingPage`].
    pub fn read_page(&self, id: u32) -> Result<Vec<u8>, PageFileError> {
        let mut buf = vec![0u8; self.page_size];
        self.file
            .read_exact_at(&mut buf, id as u64 * self.page_size as u64)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    PageFileError::MissingPage { id }
                } else {
                    PageFileError::Io(e)
                }
            })?;
        Ok(buf)
    }

    /// Writes exactly one page at its slot.
    pub fn write_page(&self, id: u32, buf: &[u8]) -> Result<(), PageFileError> {
        if buf.len() != self.page_size {
            return Err(PageFileError::BadBufferLen {
                expected: self.page_size,
                got: buf.len(),
            });
        }
        self.file
            .write_all_at(buf, id as u64 * self.page_size as u64)?;
        Ok(())
    }

    /// Explicit existence check: the file extends past the page's slot.
    pub fn contains_page(&self, id: u32) -> Result<bool, PageFileError> {
        let len = self.file.metadata()?.len();
        Ok(len >= (id as u64 + 1) * self.page_size as u64)
    }

    /// Forces written pages to disk.
    pub fn sync(&self) -> Result<(), PageFileError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Configured page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
