use crate::lsm::LsmConfig;

pub use crate::testutil::{init_tracing, wal_suppression_lock};

/// Config that never flushes on its own — memtable-only behavior.
pub fn memtable_only_config() -> LsmConfig {
    init_tracing();
    LsmConfig {
        mem_flush_bytes: 64 * 1024,
        memtable_max_entries: 10_000,
        compact_trigger: 1_000,
        sparse_every: 4,
    }
}

/// Config with a tiny byte threshold so every few writes flush, but
/// compaction never triggers on its own.
pub fn tiny_flush_config() -> LsmConfig {
    init_tracing();
    LsmConfig {
        mem_flush_bytes: 1,
        memtable_max_entries: 10_000,
        compact_trigger: 1_000,
        sparse_every: 4,
    }
}

/// Defaults: entry-count safety stop of 4, compaction at 4 tables.
pub fn default_config() -> LsmConfig {
    init_tracing();
    LsmConfig::default()
}
