//! Live-SSTable registry of the LSM engine.
//!
//! The manifest is a small text file naming every live SSTable in
//! creation order, plus the monotonic id counter for the next table:
//!
//! ```text
//! nextSstId=7
//! sst=sst-000004.dat
//! sst=sst-000006.dat
//! ```
//!
//! Every mutation rewrites the whole file to a sibling `.tmp` and
//! atomically renames it over the canonical path, then fsyncs the
//! directory. Readers observe either the old or the new list, never a
//! partial one — this rename is the commit point for flushes and
//! compactions.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::fsync_dir;

const MANIFEST_FILENAME: &str = "manifest.txt";
const TMP_SUFFIX: &str = ".tmp";
const NEXT_ID_KEY: &str = "nextSstId";
const SST_KEY: &str = "sst";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unparseable directive line or missing counter.
    #[error("corrupt manifest: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest core
// ------------------------------------------------------------------------------------------------

/// In-memory manifest state with atomic persistence.
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    next_sst_id: u64,
    /// Live SSTable file names, oldest first (append order = creation order).
    sstables: Vec<String>,
}

impl Manifest {
    /// Loads the manifest from `dir`, or creates and persists a fresh
    /// one (`nextSstId=1`, no tables) if the file is absent.
    pub fn load_or_create(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILENAME);

        if !path.exists() {
            let manifest = Self {
                dir: dir.to_path_buf(),
                next_sst_id: 1,
                sstables: Vec::new(),
            };
            manifest.persist()?;
            info!(path = %path.display(), "manifest created");
            return Ok(manifest);
        }

        let mut text = String::new();
        File::open(&path)?.read_to_string(&mut text)?;

        let mut next_sst_id: Option<u64> = None;
        let mut sstables = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((NEXT_ID_KEY, value)) => {
                    let id = value.parse::<u64>().map_err(|_| {
                        ManifestError::Corrupt(format!("bad {NEXT_ID_KEY} value {value:?}"))
                    })?;
                    next_sst_id = Some(id);
                }
                Some((SST_KEY, name)) => sstables.push(name.to_string()),
                _ => {
                    return Err(ManifestError::Corrupt(format!(
                        "unrecognized directive {line:?}"
                    )));
                }
            }
        }

        let next_sst_id = next_sst_id
            .ok_or_else(|| ManifestError::Corrupt(format!("missing {NEXT_ID_KEY} directive")))?;

        debug!(
            path = %path.display(),
            next_sst_id,
            sstables = sstables.len(),
            "manifest loaded"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            next_sst_id,
            sstables,
        })
    }

    /// Allocates the next SSTable id (post-increment) and persists the
    /// advanced counter.
    pub fn next_id(&mut self) -> Result<u64, ManifestError> {
        let id = self.next_sst_id;
        self.next_sst_id += 1;
        self.persist()?;
        Ok(id)
    }

    /// Appends a newly published SSTable and persists atomically.
    pub fn add_sstable(&mut self, name: &str) -> Result<(), ManifestError> {
        self.sstables.push(name.to_string());
        self.persist()?;
        info!(name = %name, live = self.sstables.len(), "SSTable added to manifest");
        Ok(())
    }

    /// Replaces the whole live set with a single merged table and
    /// persists atomically. Used by full compaction.
    pub fn replace_all_with(&mut self, name: &str) -> Result<(), ManifestError> {
        self.sstables.clear();
        self.sstables.push(name.to_string());
        self.persist()?;
        info!(name = %name, "manifest swapped to compacted SSTable");
        Ok(())
    }

    /// Live SSTable names, oldest first.
    pub fn sstables_oldest_to_newest(&self) -> &[String] {
        &self.sstables
    }

    /// Live SSTable names, newest first (read-path order).
    pub fn sstables_newest_first(&self) -> impl Iterator<Item = &String> {
        self.sstables.iter().rev()
    }

    /// Number of live SSTables.
    pub fn sstable_count(&self) -> usize {
        self.sstables.len()
    }

    fn persist(&self) -> Result<(), ManifestError> {
        let path = self.dir.join(MANIFEST_FILENAME);
        let tmp_path = self.dir.join(format!("{MANIFEST_FILENAME}{TMP_SUFFIX}"));

        let mut text = format!("{NEXT_ID_KEY}={}\n", self.next_sst_id);
        for name in &self.sstables {
            text.push_str(&format!("{SST_KEY}={name}\n"));
        }

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
