//! # B-Tree storage engine
//!
//! A page-oriented B-Tree over one data file, with a page-image
//! write-ahead log and an atomically replaced meta file.
//!
//! ## Write path
//!
//! `put` descends from the root, recording `(pageId, childIndex)` on a
//! path stack. The leaf is updated in place in its sorted arrays; a
//! page pushed past `max_keys_per_page` splits, promoting a separator
//! key into its parent, cascading up to (and through) the root. All
//! pages touched by one `put` form a single commit batch:
//!
//! 1. append every page image to the WAL,
//! 2. fsync the WAL,
//! 3. write every page into the page file,
//! 4. fsync the page file,
//! 5. persist the meta file atomically,
//! 6. reset the WAL.
//!
//! A crash before step 2 loses nothing committed; a crash after step 2
//! is repaired on the next open by replaying the page images, which is
//! idempotent.
//!
//! ## Read path
//!
//! Descend by binary search: an exact separator match goes to the
//! right child of the matching key, otherwise to the child at the
//! insertion point; the leaf answers by binary search.
//!
//! `delete` is unsupported — there is no underflow handling.
//!
//! ## Concurrency
//!
//! One coarse monitor serializes all operations, matching the LSM
//! engine's model.

pub mod meta;
pub mod page;
pub mod pagefile;
pub mod wal;

#[cfg(test)]
mod tests;

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{KvStore, StoreError};
use meta::{DEFAULT_PAGE_SIZE, Meta, MetaError};
use page::{Page, PageError, decode_page, encode_page};
use pagefile::{PageFile, PageFileError};
use wal::{PageWal, PageWalError};

const PAGE_FILE_NAME: &str = "btree.data";
const WAL_FILENAME: &str = "wal.log";

/// Default cap on keys per page — intentionally tiny so splits are
/// observable in small workloads.
pub const DEFAULT_MAX_KEYS_PER_PAGE: usize = 3;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during B-Tree engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BtreeError {
    /// Error from the page codec (overflow or corruption).
    #[error("page codec error: {0}")]
    Page(#[from] PageError),

    /// Error from the page file.
    #[error("page file error: {0}")]
    PageFile(#[from] PageFileError),

    /// Error from the page WAL.
    #[error("WAL error: {0}")]
    Wal(#[from] PageWalError),

    /// Error from the meta file.
    #[error("meta error: {0}")]
    Meta(#[from] MetaError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `delete` has no implementation in this engine.
    #[error("delete is not supported by the B-Tree engine")]
    DeleteUnsupported,

    /// The empty key is rejected before any side effect.
    #[error("key must not be empty")]
    EmptyKey,

    /// Internal invariant violation (poisoned lock, malformed tree).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Tunables for a [`BtreeEngine`] instance.
#[derive(Debug, Clone)]
pub struct BtreeConfig {
    /// Page size in bytes. A previously created database keeps its
    /// stored page size regardless of this value.
    pub page_size: usize,

    /// Keys a page may hold before an insert forces a split.
    pub max_keys_per_page: usize,
}

impl Default for BtreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_keys_per_page: DEFAULT_MAX_KEYS_PER_PAGE,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine core
// ------------------------------------------------------------------------------------------------

struct BtreeInner {
    meta: Meta,
    pages: PageFile,
    wal: PageWal,
    max_keys_per_page: usize,
    /// Page images applied by the most recent open's WAL replay.
    replayed_on_open: usize,
}

/// The B-Tree engine handle.
///
/// Cloneable; all clones share one engine guarded by a single monitor.
pub struct BtreeEngine {
    inner: Arc<Mutex<BtreeInner>>,
}

impl Clone for BtreeEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl BtreeEngine {
    /// Opens (or creates) an engine rooted at `dir`.
    ///
    /// Replays the WAL into the page file (fsyncing and resetting the
    /// log if anything was applied), then bootstraps page 0 as an
    /// empty-leaf root if the page file does not contain it yet.
    pub fn open(dir: impl AsRef<Path>, config: BtreeConfig) -> Result<Self, BtreeError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let meta = Meta::load_or_create(dir, config.page_size)?;
        let pages = PageFile::open(dir.join(PAGE_FILE_NAME), meta.page_size())?;
        let mut wal = PageWal::open(dir.join(WAL_FILENAME))?;

        let replayed = wal.replay_into(&pages)?;
        if replayed > 0 {
            pages.sync()?;
            if crate::wal_reset_suppressed() {
                debug!("WAL reset suppressed after recovery replay");
            } else {
                wal.reset()?;
            }
        }

        let mut inner = BtreeInner {
            meta,
            pages,
            wal,
            max_keys_per_page: config.max_keys_per_page,
            replayed_on_open: replayed,
        };

        if !inner.pages.contains_page(0)? {
            let page_size = inner.meta.page_size();
            let root = encode_page(&Page::empty_leaf(), page_size)?;
            Self::commit(&mut inner, vec![(0, root)])?;
            info!(dir = %dir.display(), "empty-leaf root initialized");
        }

        info!(
            dir = %dir.display(),
            root = inner.meta.root_page_id(),
            wal_images = replayed,
            "B-Tree engine opened"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BtreeInner>, BtreeError> {
        self.inner
            .lock()
            .map_err(|_| BtreeError::Internal("mutex poisoned".into()))
    }

    /// Look up a key by descending from the root.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BtreeError> {
        if key.is_empty() {
            return Err(BtreeError::EmptyKey);
        }
        let inner = self.lock()?;

        let mut page_id = inner.meta.root_page_id();
        loop {
            let page = decode_page(&inner.pages.read_page(page_id)?)?;
            match page {
                Page::Leaf { keys, values } => {
                    return Ok(match keys.binary_search_by(|k| k.as_str().cmp(key)) {
                        Ok(i) => Some(values[i].clone()),
                        Err(_) => None,
                    });
                }
                Page::Internal { keys, children } => {
                    page_id = descend_child(&keys, &children, key, page_id)?;
                }
            }
        }
    }

    /// Insert or overwrite a key, splitting pages as needed, and
    /// commit every touched page as one batch.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), BtreeError> {
        if key.is_empty() {
            return Err(BtreeError::EmptyKey);
        }
        let mut inner = self.lock()?;
        let page_size = inner.meta.page_size();
        let max_keys = inner.max_keys_per_page;

        // Descend to the leaf, recording the path for propagation.
        let mut path: Vec<(u32, usize)> = Vec::new();
        let mut page_id = inner.meta.root_page_id();
        let (mut keys, mut values) = loop {
            let page = decode_page(&inner.pages.read_page(page_id)?)?;
            match page {
                Page::Leaf { keys, values } => break (keys, values),
                Page::Internal { keys, children } => {
                    let idx = child_index(&keys, &children, key, page_id)?;
                    path.push((page_id, idx));
                    page_id = children[idx];
                }
            }
        };

        // Insert or overwrite in the leaf's sorted arrays.
        match keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(i) => values[i] = value.to_vec(),
            Err(i) => {
                keys.insert(i, key.to_string());
                values.insert(i, value.to_vec());
            }
        }

        // Pages are encoded as they are staged, so an overflow fails
        // the operation before any durable state or the root pointer
        // is touched.
        let mut batch: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut promotion: Option<(String, u32)> = None;

        if keys.len() > max_keys {
            let mid = keys.len() / 2;
            let right_keys = keys.split_off(mid);
            let right_values = values.split_off(mid);
            let right_id = inner.meta.alloc_page_id();
            promotion = Some((right_keys[0].clone(), right_id));
            stage(&mut batch, page_id, &Page::Leaf { keys, values }, page_size)?;
            stage(
                &mut batch,
                right_id,
                &Page::Leaf {
                    keys: right_keys,
                    values: right_values,
                },
                page_size,
            )?;
        } else {
            stage(&mut batch, page_id, &Page::Leaf { keys, values }, page_size)?;
        }

        // Propagate promotions up the recorded path.
        while let Some((sep_key, right_id)) = promotion.take() {
            let Some((parent_id, child_idx)) = path.pop() else {
                // The promotion outlived the path: grow a new root.
                let old_root = inner.meta.root_page_id();
                let new_root_id = inner.meta.alloc_page_id();
                stage(
                    &mut batch,
                    new_root_id,
                    &Page::Internal {
                        keys: vec![sep_key],
                        children: vec![old_root, right_id],
                    },
                    page_size,
                )?;
                inner.meta.set_root_page_id(new_root_id);
                debug!(root = new_root_id, "root split");
                break;
            };

            let parent = decode_page(&inner.pages.read_page(parent_id)?)?;
            let Page::Internal {
                mut keys,
                mut children,
            } = parent
            else {
                return Err(BtreeError::Internal(format!(
                    "page {parent_id} on the descent path is not internal"
                )));
            };

            keys.insert(child_idx, sep_key);
            children.insert(child_idx + 1, right_id);

            if keys.len() > max_keys {
                let mid = keys.len() / 2;
                let promoted = keys[mid].clone();
                let right_keys = keys.split_off(mid + 1);
                keys.pop(); // the separator moves up, not right
                let right_children = children.split_off(mid + 1);
                let new_right_id = inner.meta.alloc_page_id();
                promotion = Some((promoted, new_right_id));
                stage(
                    &mut batch,
                    parent_id,
                    &Page::Internal { keys, children },
                    page_size,
                )?;
                stage(
                    &mut batch,
                    new_right_id,
                    &Page::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                    page_size,
                )?;
            } else {
                stage(
                    &mut batch,
                    parent_id,
                    &Page::Internal { keys, children },
                    page_size,
                )?;
            }
        }

        Self::commit(&mut inner, batch)
    }

    /// Always fails: this engine has no delete (and no underflow
    /// handling). State is left untouched.
    pub fn delete(&self, _key: &str) -> Result<(), BtreeError> {
        Err(BtreeError::DeleteUnsupported)
    }

    /// Page images applied by the most recent open's WAL replay.
    pub fn wal_records_recovered(&self) -> Result<usize, BtreeError> {
        Ok(self.lock()?.replayed_on_open)
    }

    /// Syncs the page file and WAL. The long-lived handles are
    /// released when the last engine clone drops.
    pub fn close(&self) -> Result<(), BtreeError> {
        let inner = self.lock()?;
        inner.pages.sync()?;
        inner.wal.sync()?;
        info!("B-Tree engine closed");
        Ok(())
    }

    /// The single-transaction commit: WAL images → WAL fsync → page
    /// writes → page fsync → meta persist → WAL reset.
    fn commit(inner: &mut BtreeInner, batch: Vec<(u32, Vec<u8>)>) -> Result<(), BtreeError> {
        for (id, bytes) in &batch {
            inner.wal.append_page(*id, bytes)?;
        }
        inner.wal.sync()?;

        for (id, bytes) in &batch {
            inner.pages.write_page(*id, bytes)?;
        }
        inner.pages.sync()?;

        inner.meta.persist()?;

        if crate::wal_reset_suppressed() {
            debug!("WAL reset suppressed after commit");
        } else {
            inner.wal.reset()?;
        }

        Ok(())
    }
}

impl KvStore for BtreeEngine {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        BtreeEngine::put(self, key, value).map_err(StoreError::from)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        BtreeEngine::get(self, key).map_err(StoreError::from)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        BtreeEngine::delete(self, key).map_err(StoreError::from)
    }

    fn close(&self) -> Result<(), StoreError> {
        BtreeEngine::close(self).map_err(StoreError::from)
    }
}

// ------------------------------------------------------------------------------------------------
// Descent and staging helpers
// ------------------------------------------------------------------------------------------------

/// Child slot for `key` in an internal page: the right child of an
/// exact separator match, otherwise the child at the insertion point.
fn child_index(
    keys: &[String],
    children: &[u32],
    key: &str,
    page_id: u32,
) -> Result<usize, BtreeError> {
    if children.is_empty() {
        return Err(BtreeError::Internal(format!(
            "internal page {page_id} has no children"
        )));
    }
    Ok(match keys.binary_search_by(|k| k.as_str().cmp(key)) {
        Ok(i) => i + 1,
        Err(i) => i,
    })
}

fn descend_child(
    keys: &[String],
    children: &[u32],
    key: &str,
    page_id: u32,
) -> Result<u32, BtreeError> {
    let idx = child_index(keys, children, key, page_id)?;
    Ok(children[idx])
}

/// Encode a page and stage it for commit.
fn stage(
    batch: &mut Vec<(u32, Vec<u8>)>,
    id: u32,
    page: &Page,
    page_size: usize,
) -> Result<(), BtreeError> {
    batch.push((id, encode_page(page, page_size)?));
    Ok(())
}
