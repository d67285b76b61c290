use crate::btree::BtreeConfig;

pub use crate::testutil::{init_tracing, wal_suppression_lock};

/// Defaults: 4 KiB pages, splits after the third key.
pub fn default_config() -> BtreeConfig {
    init_tracing();
    BtreeConfig::default()
}

/// Tiny max-keys cap so a handful of puts exercises splits.
pub fn splitty_config() -> BtreeConfig {
    init_tracing();
    BtreeConfig {
        page_size: 4096,
        max_keys_per_page: 3,
    }
}
