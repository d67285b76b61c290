//! Full compaction: merge every live SSTable into one.
//!
//! The simple all-at-once design trades write amplification for an
//! easy correctness argument: after the merge buffer is complete no
//! older table can re-surface a key, so every tombstone is spent and
//! dropped. The manifest swap is the single commit point; a crash on
//! either side of it leaves only orphan files, which the engine's
//! startup cleanup removes.

use std::{collections::BTreeMap, fs, path::Path};

use tracing::{info, warn};

use crate::fsync_dir;
use crate::lsm::{
    LsmError,
    manifest::Manifest,
    memtable::ValueRecord,
    sstable::{self, SstReader},
};

/// Merges all live SSTables into a single new table, swaps the
/// manifest to it, and deletes the old files best-effort.
///
/// No-op when the manifest lists no tables.
pub(crate) fn compact_all(
    sst_dir: &Path,
    manifest: &mut Manifest,
    sparse_every: usize,
) -> Result<(), LsmError> {
    let old_names: Vec<String> = manifest.sstables_newest_first().cloned().collect();
    if old_names.is_empty() {
        return Ok(());
    }

    // Newest-to-oldest merge: the first table to supply a key wins,
    // older versions of it are shadowed and skipped.
    let mut merged: BTreeMap<String, ValueRecord> = BTreeMap::new();
    for name in &old_names {
        let reader = SstReader::open(&sst_dir.join(name))?;
        for (key, record) in reader.read_all()? {
            merged.entry(key).or_insert(record);
        }
    }

    // Every surviving tombstone is spent: no older table remains to
    // re-surface its key.
    merged.retain(|_, record| !record.is_tombstone());

    let id = manifest.next_id()?;
    let name = format!("sst-{id:06}.dat");
    let out_path = sst_dir.join(&name);
    let tmp_path = sst_dir.join(format!("{name}.tmp"));

    sstable::write_sstable(&tmp_path, &merged, sparse_every)?;
    fs::rename(&tmp_path, &out_path)?;
    fsync_dir(sst_dir)?;

    manifest.replace_all_with(&name)?;

    // Old tables are no longer referenced; removal is best-effort and
    // a missing file is not an error.
    for old in &old_names {
        match fs::remove_file(sst_dir.join(old)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(name = %old, error = %e, "failed to delete compacted SSTable"),
        }
    }

    info!(
        merged_from = old_names.len(),
        output = %name,
        records = merged.len(),
        "full compaction finished"
    );
    Ok(())
}
