//! In-memory ordered write buffer of the LSM engine.
//!
//! The memtable holds the most recent mutations as an ordered map from
//! key to [`ValueRecord`]. Deletes are stored as tombstones, never as
//! physical removals, so a delete shadows older on-disk versions of the
//! key until compaction collapses them. The map is cleared after every
//! successful flush; durability comes from the WAL, not from this
//! structure.

use std::collections::BTreeMap;

// ------------------------------------------------------------------------------------------------
// Value records
// ------------------------------------------------------------------------------------------------

/// A stored value or a deletion marker.
///
/// `Tombstone` is distinct from "absent": an absent key falls through
/// to older SSTables on read, a tombstone terminates the lookup with
/// "not found". The distinction must survive the WAL, the memtable,
/// and every SSTable until a full compaction drops spent tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRecord {
    /// A live value. The empty value is valid.
    Present(Vec<u8>),

    /// The key has been deleted at this position in the log.
    Tombstone,
}

impl ValueRecord {
    /// Returns `true` for the deletion marker.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, ValueRecord::Tombstone)
    }

    /// Bytes this record contributes to the memtable size estimate
    /// (tombstones carry no value payload).
    fn value_bytes(&self) -> usize {
        match self {
            ValueRecord::Present(v) => v.len(),
            ValueRecord::Tombstone => 0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Ordered key → [`ValueRecord`] buffer with byte-size accounting.
///
/// The engine flushes on the byte estimate (`approx_bytes`); the entry
/// count cap behind [`Memtable::is_full`] is a coarse safety stop.
#[derive(Debug)]
pub struct Memtable {
    entries: BTreeMap<String, ValueRecord>,
    approx_bytes: usize,
    max_entries: usize,
}

impl Memtable {
    /// Creates an empty memtable with the given entry-count safety cap.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            approx_bytes: 0,
            max_entries,
        }
    }

    /// Insert or overwrite a key with a live value.
    pub fn put(&mut self, key: String, value: Vec<u8>) {
        self.insert(key, ValueRecord::Present(value));
    }

    /// Record a deletion for the key.
    pub fn delete(&mut self, key: String) {
        self.insert(key, ValueRecord::Tombstone);
    }

    fn insert(&mut self, key: String, record: ValueRecord) {
        let key_bytes = key.len();
        let value_bytes = record.value_bytes();
        match self.entries.insert(key, record) {
            // Overwrite: the key bytes were already counted once.
            Some(old) => {
                self.approx_bytes -= old.value_bytes();
                self.approx_bytes += value_bytes;
            }
            None => self.approx_bytes += key_bytes + value_bytes,
        }
    }

    /// Look up a key. `None` means absent (distinct from a tombstone hit).
    pub fn get(&self, key: &str) -> Option<&ValueRecord> {
        self.entries.get(key)
    }

    /// Independent ordered copy of the current contents, for the flush
    /// path. The memtable itself is untouched.
    pub fn snapshot(&self) -> BTreeMap<String, ValueRecord> {
        self.entries.clone()
    }

    /// Byte-size estimate: key bytes plus live value bytes.
    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    /// Drop all entries and reset the size estimate.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.approx_bytes = 0;
    }

    /// Number of entries (tombstones included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the memtable holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Coarse safety stop: entry count has reached the cap.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }
}
