//! Write-ahead log of logical LSM mutations.
//!
//! Every `put`/`delete` is appended here and fsynced before it touches
//! the memtable, so any acknowledged write survives a crash. On open,
//! the engine replays the log into a fresh memtable. The log is
//! truncated only after a flush has made its contents durable in an
//! SSTable and the manifest.
//!
//! # On-disk layout
//!
//! ```text
//! [keyLen:i32 BE][valLen:i32 BE][keyBytes][valBytes?]
//! [keyLen:i32 BE][valLen:i32 BE][keyBytes][valBytes?]
//! ...
//! ```
//!
//! `valLen = -1` encodes a tombstone; no value bytes follow it. A
//! record whose header or payload would extend past end-of-file is a
//! **torn tail** (the natural residue of a crash mid-append) and
//! replay stops cleanly there. Length fields outside the sanity bounds
//! are corruption and fail the replay.
//!
//! # Handle lifetime
//!
//! One append-mode handle is held for the engine's lifetime. Nothing
//! coordinates concurrent opens of the same path; the engine's
//! single-writer monitor is what makes this safe.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::lsm::memtable::Memtable;

/// Upper sanity bound on an encoded key length.
pub const MAX_KEY_LEN: usize = 10_000_000;

/// Upper sanity bound on an encoded value length.
pub const MAX_VALUE_LEN: usize = 100_000_000;

const TOMBSTONE_VAL_LEN: i32 = -1;
const RECORD_HEADER_LEN: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key or value exceeds the sanity bounds.
    #[error("record too large ({0} bytes)")]
    RecordTooLarge(usize),

    /// A length field or payload at a non-tail position is unsound.
    #[error("corrupt WAL record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

// ------------------------------------------------------------------------------------------------
// WAL core
// ------------------------------------------------------------------------------------------------

/// Append-only log of logical put/tombstone records.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Opens (or creates) the WAL at the given path, holding one
    /// append-mode handle for the lifetime of the instance.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        info!(path = %path.display(), len = file.metadata()?.len(), "WAL opened");

        Ok(Self { file, path })
    }

    /// Appends a live-value record and fsyncs before returning.
    pub fn append_put(&mut self, key: &str, value: &[u8]) -> Result<(), WalError> {
        if key.len() > MAX_KEY_LEN {
            return Err(WalError::RecordTooLarge(key.len()));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(WalError::RecordTooLarge(value.len()));
        }
        self.append(key, Some(value))
    }

    /// Appends a tombstone record and fsyncs before returning.
    pub fn append_tombstone(&mut self, key: &str) -> Result<(), WalError> {
        if key.len() > MAX_KEY_LEN {
            return Err(WalError::RecordTooLarge(key.len()));
        }
        self.append(key, None)
    }

    fn append(&mut self, key: &str, value: Option<&[u8]>) -> Result<(), WalError> {
        let mut buf =
            Vec::with_capacity(RECORD_HEADER_LEN + key.len() + value.map_or(0, |v| v.len()));
        buf.write_i32::<BigEndian>(key.len() as i32)?;
        match value {
            Some(v) => buf.write_i32::<BigEndian>(v.len() as i32)?,
            None => buf.write_i32::<BigEndian>(TOMBSTONE_VAL_LEN)?,
        }
        buf.extend_from_slice(key.as_bytes());
        if let Some(v) = value {
            buf.extend_from_slice(v);
        }

        self.file.write_all(&buf)?;
        self.file.sync_all()?;

        trace!(
            key_len = key.len(),
            tombstone = value.is_none(),
            "WAL record appended"
        );
        Ok(())
    }

    /// Replays all complete records from offset 0 into the memtable.
    ///
    /// Stops cleanly at a torn tail; fails on out-of-bounds lengths or
    /// non-UTF-8 key bytes. Returns the number of records applied.
    pub fn replay_into(&mut self, memtable: &mut Memtable) -> Result<usize, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");

        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        let mut offset = 0usize;
        let mut applied = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < RECORD_HEADER_LEN {
                warn!(offset, remaining, "torn WAL tail (partial header), discarding");
                break;
            }

            let key_len = read_i32_be(&bytes[offset..]);
            let val_len = read_i32_be(&bytes[offset + 4..]);

            if key_len <= 0 || key_len as usize > MAX_KEY_LEN {
                return Err(WalError::Corrupt {
                    offset: offset as u64,
                    reason: format!("key length {key_len} out of bounds"),
                });
            }
            if val_len < TOMBSTONE_VAL_LEN || val_len as i64 > MAX_VALUE_LEN as i64 {
                return Err(WalError::Corrupt {
                    offset: offset as u64,
                    reason: format!("value length {val_len} out of bounds"),
                });
            }

            let key_len = key_len as usize;
            let payload = key_len + val_len.max(0) as usize;
            if remaining < RECORD_HEADER_LEN + payload {
                warn!(offset, "torn WAL tail (partial payload), discarding");
                break;
            }

            let key_start = offset + RECORD_HEADER_LEN;
            let key = std::str::from_utf8(&bytes[key_start..key_start + key_len])
                .map_err(|_| WalError::Corrupt {
                    offset: offset as u64,
                    reason: "key is not valid UTF-8".into(),
                })?
                .to_string();

            if val_len == TOMBSTONE_VAL_LEN {
                memtable.delete(key);
            } else {
                let val_start = key_start + key_len;
                memtable.put(key, bytes[val_start..val_start + val_len as usize].to_vec());
            }

            offset += RECORD_HEADER_LEN + payload;
            applied += 1;
        }

        info!(
            path = %self.path.display(),
            records = applied,
            "WAL replay finished"
        );
        Ok(applied)
    }

    /// Truncates the log to zero bytes.
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;

        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Current on-disk size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata()?.len())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            tracing::error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
        }
    }
}

fn read_i32_be(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}
