//! # duokv
//!
//! An embeddable, durable key-value store with two independent,
//! from-scratch storage engines behind one key→bytes interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     KvStore contract                      │
//! │                  put / get / delete / close               │
//! ├─────────────────────────────┬─────────────────────────────┤
//! │         LsmEngine           │         BtreeEngine         │
//! │  ┌──────────┐ ┌──────────┐  │  ┌──────────┐ ┌──────────┐  │
//! │  │ Memtable │ │ SSTables │  │  │  Pages   │ │   Meta   │  │
//! │  │  + WAL   │ │ (on disk)│  │  │  + WAL   │ │ (on disk)│  │
//! │  └────┬─────┘ └────┬─────┘  │  └────┬─────┘ └────┬─────┘  │
//! │       │  flush     │        │       │  commit    │        │
//! │       └──────────► │        │       └──────────► │        │
//! │                    │        │                    │        │
//! │  ┌─────────────────┘        │                    │        │
//! │  │ Compaction (full merge)  │                    │        │
//! │  └──────────────────────────┴────────────────────┘        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`lsm`] | Log-structured merge engine — memtable, WAL, SSTables, manifest, compaction |
//! | [`btree`] | B-Tree engine — fixed-size pages, page-image WAL, meta file, splits |
//!
//! ## Durability protocol
//!
//! Both engines share one checkpoint discipline: every mutation is
//! appended to an append-only redo log and fsynced *before* the stable
//! store is touched; metadata files are replaced atomically
//! (tmp + rename); the log is truncated only after its effects are
//! durable in the stable store. A crash at any point is recovered by
//! replaying the log on the next open.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duokv::{KvStore, LsmConfig, LsmEngine};
//!
//! let engine = LsmEngine::open("/tmp/my_db", LsmConfig::default()).unwrap();
//!
//! engine.put("hello", b"world").unwrap();
//! assert_eq!(engine.get("hello").unwrap(), Some(b"world".to_vec()));
//!
//! engine.delete("hello").unwrap();
//! assert_eq!(engine.get("hello").unwrap(), None);
//!
//! engine.close().unwrap();
//! ```
//!
//! The B-Tree engine exposes the same contract via
//! [`BtreeEngine`], except that `delete` is unsupported there.

pub mod btree;
pub mod lsm;

#[cfg(test)]
pub(crate) mod testutil;

pub use btree::{BtreeConfig, BtreeEngine, BtreeError};
pub use lsm::{LsmConfig, LsmEngine, LsmError};

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced through the [`KvStore`] contract.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Error originating from the LSM engine.
    #[error("LSM engine error: {0}")]
    Lsm(#[from] LsmError),

    /// Error originating from the B-Tree engine.
    #[error("B-Tree engine error: {0}")]
    Btree(#[from] BtreeError),
}

// ------------------------------------------------------------------------------------------------
// KV contract
// ------------------------------------------------------------------------------------------------

/// The uniform key→bytes contract both engines implement.
///
/// Keys are non-empty UTF-8 strings compared by byte order; values are
/// arbitrary byte arrays (the empty value is valid and distinct from a
/// deleted key).
///
/// Every successful `put` is durable before it returns: a subsequent
/// `get` observes it, and a crash immediately after the call does not
/// lose it.
pub trait KvStore {
    /// Insert or overwrite a key.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Look up a key. `Ok(None)` means the key is absent or deleted.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete a key. The B-Tree engine rejects this operation.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Release engine resources after syncing pending state.
    fn close(&self) -> Result<(), StoreError>;
}

// ------------------------------------------------------------------------------------------------
// WAL-reset suppression (recovery testing hook)
// ------------------------------------------------------------------------------------------------

static SUPPRESS_WAL_RESET: AtomicBool = AtomicBool::new(false);

/// Process-wide toggle that suppresses WAL truncation on successful
/// checkpoints.
///
/// With suppression enabled the redo logs keep growing and every
/// subsequent open replays them in full, which is exactly what crash
/// recovery tests need. Replay is idempotent in both engines, so
/// leaving the toggle on never corrupts state. Production behavior is
/// the default: reset the WAL after each checkpoint.
pub fn suppress_wal_reset(enabled: bool) {
    SUPPRESS_WAL_RESET.store(enabled, Ordering::SeqCst);
}

pub(crate) fn wal_reset_suppressed() -> bool {
    SUPPRESS_WAL_RESET.load(Ordering::SeqCst)
}

/// Fsync a directory so a rename inside it is durable.
pub(crate) fn fsync_dir(dir: &std::path::Path) -> Result<(), std::io::Error> {
    std::fs::File::open(dir)?.sync_all()
}
