//! Durable root/allocator state of the B-Tree engine.
//!
//! A small text file, one directive per line:
//!
//! ```text
//! rootPageId=0
//! nextPageId=1
//! pageSize=4096
//! version=1
//! magic=3203383023
//! ```
//!
//! The meta file is replaced atomically (tmp + rename + directory
//! fsync) as the final durable step of every commit, so a reader sees
//! either the pre-commit or post-commit root, never a torn file.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::fsync_dir;

/// Magic constant identifying a meta file.
pub const META_MAGIC: u32 = 0xBEEF_BEEF;

/// Current meta format version.
pub const META_VERSION: u32 = 1;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

const META_FILENAME: &str = "meta.txt";
const TMP_SUFFIX: &str = ".tmp";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by meta-file operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetaError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Missing directive, unparseable value, or bad magic/version.
    #[error("corrupt meta file: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Meta core
// ------------------------------------------------------------------------------------------------

/// In-memory meta state with atomic persistence.
#[derive(Debug)]
pub struct Meta {
    dir: PathBuf,
    root_page_id: u32,
    next_page_id: u32,
    page_size: usize,
    version: u32,
}

impl Meta {
    /// Loads the meta file from `dir`, or creates and persists a fresh
    /// one (root 0, next id 1) if absent. A stored page size always
    /// wins over the requested one.
    pub fn load_or_create(dir: &Path, page_size: usize) -> Result<Self, MetaError> {
        let path = dir.join(META_FILENAME);

        if !path.exists() {
            let meta = Self {
                dir: dir.to_path_buf(),
                root_page_id: 0,
                next_page_id: 1,
                page_size,
                version: META_VERSION,
            };
            meta.persist()?;
            info!(path = %path.display(), page_size, "meta file created");
            return Ok(meta);
        }

        let mut text = String::new();
        File::open(&path)?.read_to_string(&mut text)?;

        let mut root_page_id = None;
        let mut next_page_id = None;
        let mut stored_page_size = None;
        let mut version = None;
        let mut magic = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                MetaError::Corrupt(format!("unrecognized directive {line:?}"))
            })?;
            let parsed = value
                .parse::<u64>()
                .map_err(|_| MetaError::Corrupt(format!("bad {key} value {value:?}")))?;
            match key {
                "rootPageId" => root_page_id = Some(parsed as u32),
                "nextPageId" => next_page_id = Some(parsed as u32),
                "pageSize" => stored_page_size = Some(parsed as usize),
                "version" => version = Some(parsed as u32),
                "magic" => magic = Some(parsed as u32),
                _ => {
                    return Err(MetaError::Corrupt(format!(
                        "unrecognized directive {line:?}"
                    )));
                }
            }
        }

        let magic = magic.ok_or_else(|| MetaError::Corrupt("missing magic".into()))?;
        if magic != META_MAGIC {
            return Err(MetaError::Corrupt(format!("bad magic {magic:#010x}")));
        }
        let version = version.ok_or_else(|| MetaError::Corrupt("missing version".into()))?;
        if version != META_VERSION {
            return Err(MetaError::Corrupt(format!("unsupported version {version}")));
        }

        let meta = Self {
            dir: dir.to_path_buf(),
            root_page_id: root_page_id
                .ok_or_else(|| MetaError::Corrupt("missing rootPageId".into()))?,
            next_page_id: next_page_id
                .ok_or_else(|| MetaError::Corrupt("missing nextPageId".into()))?,
            page_size: stored_page_size
                .ok_or_else(|| MetaError::Corrupt("missing pageSize".into()))?,
            version,
        };

        debug!(
            path = %path.display(),
            root = meta.root_page_id,
            next = meta.next_page_id,
            page_size = meta.page_size,
            "meta file loaded"
        );
        Ok(meta)
    }

    /// Current root page id.
    pub fn root_page_id(&self) -> u32 {
        self.root_page_id
    }

    /// Points the tree at a new root. Durable after the next
    /// [`Meta::persist`].
    pub fn set_root_page_id(&mut self, id: u32) {
        self.root_page_id = id;
    }

    /// Allocates the next page id (post-increment, in memory only;
    /// the commit's meta persist makes it durable).
    pub fn alloc_page_id(&mut self) -> u32 {
        let id = self.next_page_id;
        self.next_page_id += 1;
        id
    }

    /// Configured page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Next page id the allocator would hand out.
    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    /// Writes the meta file to a sibling tmp and atomically renames it
    /// over the canonical path, then fsyncs the directory.
    pub fn persist(&self) -> Result<(), MetaError> {
        let path = self.dir.join(META_FILENAME);
        let tmp_path = self.dir.join(format!("{META_FILENAME}{TMP_SUFFIX}"));

        let text = format!(
            "rootPageId={}\nnextPageId={}\npageSize={}\nversion={}\nmagic={}\n",
            self.root_page_id, self.next_page_id, self.page_size, self.version, META_MAGIC
        );

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(text.as_bytes())?;
            f.sync_all()?;
        }

        fs::rename(&tmp_path, &path)?;
        fsync_dir(&self.dir)?;
        Ok(())
    }
}
