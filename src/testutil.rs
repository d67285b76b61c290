//! Shared helpers for unit tests across both engines.

use std::sync::{Mutex, MutexGuard, OnceLock};

use tracing_subscriber::EnvFilter;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serializes tests that toggle the process-wide WAL-reset suppression
/// flag, so concurrently running tests never observe each other's
/// setting. Hold the returned guard for the whole test body and turn
/// the flag back off before dropping it.
pub fn wal_suppression_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
