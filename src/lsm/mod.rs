//! # LSM storage engine
//!
//! A log-structured merge engine with a single in-memory write buffer,
//! a logical write-ahead log, immutable sorted tables, a text manifest,
//! and full compaction.
//!
//! ## Write path
//!
//! `put`/`delete` append to the WAL (fsynced) first, then update the
//! memtable. When the memtable crosses its byte threshold (or the
//! entry-count safety stop) it is flushed: the snapshot is written to
//! a tmp SSTable, fsynced, atomically renamed, registered in the
//! manifest, and only then are the memtable cleared and the WAL
//! truncated. A crash anywhere in that sequence is repaired by WAL
//! replay on the next open.
//!
//! ## Read path
//!
//! Memtable first (a tombstone there terminates the lookup), then
//! SSTables newest to oldest; the first table yielding any record for
//! the key wins.
//!
//! ## Compaction
//!
//! When the live-table count reaches the trigger, every table is merged
//! into one, newest-wins, and spent tombstones are dropped. See
//! [`compaction`].
//!
//! ## Concurrency
//!
//! One coarse monitor serializes `put`, `delete`, and `get`. Every
//! state transition is linearizable on that single virtual thread; the
//! handle itself is cloneable and shareable.

mod compaction;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;

#[cfg(test)]
mod tests;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{KvStore, StoreError, fsync_dir};
use manifest::{Manifest, ManifestError};
use memtable::{Memtable, ValueRecord};
use sstable::{SstError, SstReader};
use wal::{Wal, WalError};

const WAL_FILENAME: &str = "wal.log";
const SST_DIR: &str = "sst";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during LSM engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LsmError {
    /// Error originating from the WAL.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from an SSTable.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Error originating from the manifest.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The empty key is rejected before any side effect.
    #[error("key must not be empty")]
    EmptyKey,

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tunables for an [`LsmEngine`] instance.
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Memtable byte estimate that triggers a flush.
    pub mem_flush_bytes: usize,

    /// Entry-count safety stop for the memtable.
    pub memtable_max_entries: usize,

    /// Live SSTable count that triggers full compaction.
    pub compact_trigger: usize,

    /// Sparse-index period for written SSTables.
    pub sparse_every: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            mem_flush_bytes: 4096,
            memtable_max_entries: 4,
            compact_trigger: 4,
            sparse_every: sstable::DEFAULT_SPARSE_EVERY,
        }
    }
}

/// Snapshot of engine state returned by [`LsmEngine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsmStats {
    /// Entries currently buffered in the memtable (tombstones included).
    pub memtable_entries: usize,

    /// Memtable byte estimate.
    pub memtable_bytes: usize,

    /// Live SSTables named by the manifest.
    pub sstable_count: usize,
}

// ------------------------------------------------------------------------------------------------
// Engine core
// ------------------------------------------------------------------------------------------------

struct LsmInner {
    sst_dir: PathBuf,
    wal: Wal,
    memtable: Memtable,
    manifest: Manifest,
    config: LsmConfig,
    /// Guard against re-entrant compaction.
    compacting: bool,
}

/// The LSM engine handle.
///
/// Cloneable; all clones share one engine guarded by a single monitor.
pub struct LsmEngine {
    inner: Arc<Mutex<LsmInner>>,
}

impl Clone for LsmEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LsmEngine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// Creates the directory layout, loads the manifest, removes
    /// unreferenced SSTable files and stale tmp files, and replays the
    /// WAL into a fresh memtable.
    pub fn open(dir: impl AsRef<Path>, config: LsmConfig) -> Result<Self, LsmError> {
        let dir = dir.as_ref();
        let sst_dir = dir.join(SST_DIR);
        fs::create_dir_all(&sst_dir)?;

        let manifest = Manifest::load_or_create(dir)?;
        remove_orphans(&sst_dir, &manifest)?;

        let mut wal = Wal::open(dir.join(WAL_FILENAME))?;
        let mut memtable = Memtable::new(config.memtable_max_entries);
        let replayed = wal.replay_into(&mut memtable)?;

        info!(
            dir = %dir.display(),
            wal_records = replayed,
            sstables = manifest.sstable_count(),
            "LSM engine opened"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(LsmInner {
                sst_dir,
                wal,
                memtable,
                manifest,
                config,
                compacting: false,
            })),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, LsmInner>, LsmError> {
        self.inner
            .lock()
            .map_err(|_| LsmError::Internal("mutex poisoned".into()))
    }

    /// Insert or overwrite a key.
    ///
    /// The record is durable in the WAL before this returns; the flush
    /// and compaction triggers run afterwards.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), LsmError> {
        if key.is_empty() {
            return Err(LsmError::EmptyKey);
        }
        let mut inner = self.lock()?;
        inner.wal.append_put(key, value)?;
        inner.memtable.put(key.to_string(), value.to_vec());
        Self::maybe_flush_and_compact(&mut inner)
    }

    /// Delete a key by writing a tombstone.
    pub fn delete(&self, key: &str) -> Result<(), LsmError> {
        if key.is_empty() {
            return Err(LsmError::EmptyKey);
        }
        let mut inner = self.lock()?;
        inner.wal.append_tombstone(key)?;
        inner.memtable.delete(key.to_string());
        Self::maybe_flush_and_compact(&mut inner)
    }

    /// Look up a key: memtable first, then SSTables newest to oldest.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LsmError> {
        if key.is_empty() {
            return Err(LsmError::EmptyKey);
        }
        let inner = self.lock()?;

        match inner.memtable.get(key) {
            Some(ValueRecord::Tombstone) => return Ok(None),
            Some(ValueRecord::Present(v)) => return Ok(Some(v.clone())),
            None => {}
        }

        for name in inner.manifest.sstables_newest_first() {
            let reader = SstReader::open(&inner.sst_dir.join(name))?;
            match reader.get(key)? {
                // First table yielding any record wins.
                Some(ValueRecord::Tombstone) => return Ok(None),
                Some(ValueRecord::Present(v)) => return Ok(Some(v)),
                None => {}
            }
        }

        Ok(None)
    }

    /// Flushes the memtable to a new SSTable (no-op when empty).
    pub fn flush(&self) -> Result<(), LsmError> {
        let mut inner = self.lock()?;
        Self::flush_inner(&mut inner)
    }

    /// Runs a full compaction immediately, regardless of the trigger.
    pub fn compact(&self) -> Result<(), LsmError> {
        let mut inner = self.lock()?;
        Self::compact_inner(&mut inner)
    }

    /// Snapshot of memtable and SSTable counters.
    pub fn stats(&self) -> Result<LsmStats, LsmError> {
        let inner = self.lock()?;
        Ok(LsmStats {
            memtable_entries: inner.memtable.len(),
            memtable_bytes: inner.memtable.approx_bytes(),
            sstable_count: inner.manifest.sstable_count(),
        })
    }

    /// Flushes pending writes and syncs the WAL.
    ///
    /// The engine holds no other long-lived handles; dropping the last
    /// clone releases the WAL handle itself.
    pub fn close(&self) -> Result<(), LsmError> {
        let mut inner = self.lock()?;
        Self::flush_inner(&mut inner)?;
        info!("LSM engine closed");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Internal write-path steps
    // --------------------------------------------------------------------

    fn maybe_flush_and_compact(inner: &mut LsmInner) -> Result<(), LsmError> {
        let full = inner.memtable.approx_bytes() >= inner.config.mem_flush_bytes
            || inner.memtable.is_full();
        if !full {
            return Ok(());
        }

        Self::flush_inner(inner)?;

        if inner.manifest.sstable_count() >= inner.config.compact_trigger {
            Self::compact_inner(inner)?;
        }
        Ok(())
    }

    /// The atomic flush protocol: tmp SSTable → fsync → rename →
    /// manifest append → memtable clear → WAL truncate. A crash
    /// between any two steps is repaired by the next open's WAL
    /// replay; the unreferenced tmp or renamed file it may leave
    /// behind is removed by startup cleanup.
    fn flush_inner(inner: &mut LsmInner) -> Result<(), LsmError> {
        if inner.memtable.is_empty() {
            return Ok(());
        }

        let id = inner.manifest.next_id()?;
        let name = format!("sst-{id:06}.dat");
        let out_path = inner.sst_dir.join(&name);
        let tmp_path = inner.sst_dir.join(format!("{name}.tmp"));

        let snapshot = inner.memtable.snapshot();
        sstable::write_sstable(&tmp_path, &snapshot, inner.config.sparse_every)?;
        fs::rename(&tmp_path, &out_path)?;
        fsync_dir(&inner.sst_dir)?;

        inner.manifest.add_sstable(&name)?;

        inner.memtable.clear();
        if crate::wal_reset_suppressed() {
            debug!("WAL reset suppressed after flush");
        } else {
            inner.wal.reset()?;
        }

        info!(name = %name, records = snapshot.len(), "memtable flushed");
        Ok(())
    }

    fn compact_inner(inner: &mut LsmInner) -> Result<(), LsmError> {
        if inner.compacting {
            return Ok(());
        }
        inner.compacting = true;
        let result = compaction::compact_all(
            &inner.sst_dir,
            &mut inner.manifest,
            inner.config.sparse_every,
        );
        inner.compacting = false;
        result
    }
}

impl KvStore for LsmEngine {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        LsmEngine::put(self, key, value).map_err(StoreError::from)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        LsmEngine::get(self, key).map_err(StoreError::from)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        LsmEngine::delete(self, key).map_err(StoreError::from)
    }

    fn close(&self) -> Result<(), StoreError> {
        LsmEngine::close(self).map_err(StoreError::from)
    }
}

/// Startup garbage collection: a `.dat` file the manifest does not
/// name is a leftover from a crashed flush or compaction, and any
/// `.tmp` file belongs to a write that never committed. Both are safe
/// to delete — the WAL still holds whatever was not published.
fn remove_orphans(sst_dir: &Path, manifest: &Manifest) -> Result<(), LsmError> {
    let live = manifest.sstables_oldest_to_newest();
    for entry in fs::read_dir(sst_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        let orphan = file_name.ends_with(".tmp")
            || (file_name.ends_with(".dat") && !live.iter().any(|n| n == file_name));
        if orphan {
            warn!(name = file_name, "removing orphan SSTable file");
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
