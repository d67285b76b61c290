//! Immutable sorted tables with a sparse index.
//!
//! An SSTable is produced in one shot by a flush or a compaction and
//! never modified afterwards. Readers map the file and resolve point
//! lookups through the sparse index: binary-search for the greatest
//! indexed key ≤ the target, then scan data records forward.
//!
//! # On-disk layout
//!
//! ```text
//! data section  : repeated records
//!     [kLen:i32 BE][vLen:i32 BE][kBytes][vBytes?]   (vLen = -1 ⇒ tombstone, no vBytes)
//! index section : every Nth data record
//!     [kLen:i32 BE][kBytes][offset:i64 BE]          (offset = record start in data section)
//! footer        : [indexOffset:i64 BE][indexCount:i32 BE][magic:i32 BE]   (16 bytes)
//! ```
//!
//! Data records are key-sorted; index keys are a sorted subset of the
//! data keys. `vLen = -1` (tombstone) and `vLen = 0` (empty value) are
//! distinct and both round-trip. Any record header that would cross
//! into the index section is corruption.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use byteorder::{BigEndian, WriteBytesExt};
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::lsm::memtable::ValueRecord;

/// Magic constant closing every SSTable footer.
pub const FOOTER_MAGIC: u32 = 0x5A7A_0B1E;

/// Fixed footer size in bytes.
pub const FOOTER_SIZE: usize = 16;

/// Default sparse-index period: one index entry per N data records.
pub const DEFAULT_SPARSE_EVERY: usize = 4;

const TOMBSTONE_VAL_LEN: i32 = -1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural damage: bad magic, unsound lengths, short sections.
    #[error("corrupt SSTable: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Writes the given ordered entries as a complete SSTable at `path`
/// and fsyncs the file. The caller owns the tmp-path + atomic-rename
/// publication step.
pub fn write_sstable(
    path: &Path,
    entries: &BTreeMap<String, ValueRecord>,
    sparse_every: usize,
) -> Result<(), SstError> {
    let sparse_every = sparse_every.max(1);
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    // Data section, collecting a sparse index as we go.
    let mut index: Vec<(&str, u64)> = Vec::new();
    let mut offset = 0u64;
    for (i, (key, record)) in entries.iter().enumerate() {
        if i % sparse_every == 0 {
            index.push((key.as_str(), offset));
        }

        out.write_i32::<BigEndian>(key.len() as i32)?;
        match record {
            ValueRecord::Present(v) => {
                out.write_i32::<BigEndian>(v.len() as i32)?;
                out.write_all(key.as_bytes())?;
                out.write_all(v)?;
                offset += 8 + key.len() as u64 + v.len() as u64;
            }
            ValueRecord::Tombstone => {
                out.write_i32::<BigEndian>(TOMBSTONE_VAL_LEN)?;
                out.write_all(key.as_bytes())?;
                offset += 8 + key.len() as u64;
            }
        }
    }

    // Index section.
    let index_offset = offset;
    for (key, rec_offset) in &index {
        out.write_i32::<BigEndian>(key.len() as i32)?;
        out.write_all(key.as_bytes())?;
        out.write_i64::<BigEndian>(*rec_offset as i64)?;
    }

    // Footer.
    out.write_i64::<BigEndian>(index_offset as i64)?;
    out.write_i32::<BigEndian>(index.len() as i32)?;
    out.write_u32::<BigEndian>(FOOTER_MAGIC)?;

    let file = out.into_inner().map_err(|e| SstError::Io(e.into_error()))?;
    file.sync_all()?;

    debug!(
        path = %path.display(),
        records = entries.len(),
        index_entries = index.len(),
        "SSTable written"
    );
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Read handle over one immutable SSTable file.
///
/// Opened per lookup by the engine; the mapping drops with the reader.
#[derive(Debug)]
pub struct SstReader {
    mmap: Mmap,
    index: Vec<(String, u64)>,
    index_offset: u64,
}

impl SstReader {
    /// Maps the file, validates the footer, and loads the sparse index.
    pub fn open(path: &Path) -> Result<Self, SstError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(SstError::Corrupt(format!(
                "file is {} bytes, smaller than the {} byte footer",
                mmap.len(),
                FOOTER_SIZE
            )));
        }

        let footer = &mmap[mmap.len() - FOOTER_SIZE..];
        let index_offset = read_i64_be(footer);
        let index_count = read_i32_be(&footer[8..]);
        let magic = u32::from_be_bytes([footer[12], footer[13], footer[14], footer[15]]);

        if magic != FOOTER_MAGIC {
            return Err(SstError::Corrupt(format!("bad footer magic {magic:#010x}")));
        }
        let data_end = (mmap.len() - FOOTER_SIZE) as u64;
        if index_offset < 0 || index_offset as u64 > data_end {
            return Err(SstError::Corrupt(format!(
                "index offset {index_offset} outside file bounds"
            )));
        }
        if index_count < 0 {
            return Err(SstError::Corrupt(format!(
                "negative index count {index_count}"
            )));
        }

        let index = Self::read_index(&mmap, index_offset as u64, data_end, index_count as usize)?;

        Ok(Self {
            mmap,
            index,
            index_offset: index_offset as u64,
        })
    }

    fn read_index(
        mmap: &Mmap,
        index_offset: u64,
        data_end: u64,
        count: usize,
    ) -> Result<Vec<(String, u64)>, SstError> {
        let mut index = Vec::with_capacity(count);
        let mut pos = index_offset as usize;
        let end = data_end as usize;

        for _ in 0..count {
            if pos + 4 > end {
                return Err(SstError::Corrupt("index entry header crosses footer".into()));
            }
            let key_len = read_i32_be(&mmap[pos..]);
            if key_len <= 0 || pos + 4 + key_len as usize + 8 > end {
                return Err(SstError::Corrupt(format!(
                    "index entry at {pos} has unsound key length {key_len}"
                )));
            }
            let key_start = pos + 4;
            let key = std::str::from_utf8(&mmap[key_start..key_start + key_len as usize])
                .map_err(|_| SstError::Corrupt("index key is not valid UTF-8".into()))?
                .to_string();
            let rec_offset = read_i64_be(&mmap[key_start + key_len as usize..]);
            if rec_offset < 0 || rec_offset as u64 > index_offset {
                return Err(SstError::Corrupt(format!(
                    "index entry points at offset {rec_offset} outside the data section"
                )));
            }
            index.push((key, rec_offset as u64));
            pos = key_start + key_len as usize + 8;
        }

        Ok(index)
    }

    /// Point lookup through the sparse index.
    ///
    /// `Ok(None)` means the key is not in this table (the caller falls
    /// through to older tables); a tombstone hit is returned as a
    /// record so the caller can terminate the search.
    pub fn get(&self, key: &str) -> Result<Option<ValueRecord>, SstError> {
        // Greatest indexed key ≤ target; records before it cannot match.
        let slot = self.index.partition_point(|(k, _)| k.as_str() <= key);
        let mut offset = if slot == 0 { 0 } else { self.index[slot - 1].1 };

        while offset < self.index_offset {
            let (rec_key, record, next) = self.read_record(offset)?;
            if rec_key == key {
                trace!(key, offset, "SSTable hit");
                return Ok(Some(record));
            }
            if rec_key.as_str() > key {
                // Data records are sorted; the key cannot appear later.
                return Ok(None);
            }
            offset = next;
        }

        Ok(None)
    }

    /// Sequential scan of the whole data section into an ordered map.
    /// Used by compaction.
    pub fn read_all(&self) -> Result<BTreeMap<String, ValueRecord>, SstError> {
        let mut entries = BTreeMap::new();
        let mut offset = 0u64;
        while offset < self.index_offset {
            let (key, record, next) = self.read_record(offset)?;
            entries.insert(key, record);
            offset = next;
        }
        Ok(entries)
    }

    /// Sparse index entries, exposed for invariant checks.
    pub fn index(&self) -> &[(String, u64)] {
        &self.index
    }

    fn read_record(&self, offset: u64) -> Result<(String, ValueRecord, u64), SstError> {
        let pos = offset as usize;
        let data_end = self.index_offset as usize;

        if pos + 8 > data_end {
            return Err(SstError::Corrupt(format!(
                "record header at {pos} crosses into the index section"
            )));
        }
        let key_len = read_i32_be(&self.mmap[pos..]);
        let val_len = read_i32_be(&self.mmap[pos + 4..]);

        if key_len <= 0 {
            return Err(SstError::Corrupt(format!(
                "record at {pos} has unsound key length {key_len}"
            )));
        }
        if val_len < TOMBSTONE_VAL_LEN {
            return Err(SstError::Corrupt(format!(
                "record at {pos} has unsound value length {val_len}"
            )));
        }

        let key_len = key_len as usize;
        let payload = key_len + val_len.max(0) as usize;
        if pos + 8 + payload > data_end {
            return Err(SstError::Corrupt(format!(
                "record payload at {pos} crosses into the index section"
            )));
        }

        let key_start = pos + 8;
        let key = std::str::from_utf8(&self.mmap[key_start..key_start + key_len])
            .map_err(|_| SstError::Corrupt("record key is not valid UTF-8".into()))?
            .to_string();

        let record = if val_len == TOMBSTONE_VAL_LEN {
            ValueRecord::Tombstone
        } else {
            let val_start = key_start + key_len;
            ValueRecord::Present(self.mmap[val_start..val_start + val_len as usize].to_vec())
        };

        Ok((key, record, offset + 8 + payload as u64))
    }
}

fn read_i32_be(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn read_i64_be(buf: &[u8]) -> i64 {
    i64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}
