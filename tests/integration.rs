//! Integration tests for the public key-value surface.
//!
//! These tests exercise both engines through `duokv::KvStore` only —
//! no internal modules are referenced. Engine-internal behavior
//! (flush/compaction mechanics, WAL formats, page splits) is covered
//! by the unit tests under `src/lsm/tests` and `src/btree/tests`.

use duokv::{BtreeConfig, BtreeEngine, KvStore, LsmConfig, LsmEngine, StoreError};
use tempfile::TempDir;

/// # Scenario
/// The same CRUD sequence behaves identically on both engines (minus
/// delete, which only the LSM engine supports).
///
/// # Actions
/// 1. Put three keys, overwrite one.
/// 2. Read all of them back plus a missing key.
///
/// # Expected behavior
/// Both engines return the latest value per key and `None` for the
/// missing key.
#[test]
fn both_engines_honor_the_kv_contract() {
    let lsm_dir = TempDir::new().unwrap();
    let btree_dir = TempDir::new().unwrap();

    let lsm = LsmEngine::open(lsm_dir.path(), LsmConfig::default()).unwrap();
    let btree = BtreeEngine::open(btree_dir.path(), BtreeConfig::default()).unwrap();
    let stores: [&dyn KvStore; 2] = [&lsm, &btree];

    for store in stores {
        store.put("alpha", b"1").unwrap();
        store.put("beta", b"2").unwrap();
        store.put("gamma", b"3").unwrap();
        store.put("beta", b"2b").unwrap();

        assert_eq!(store.get("alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("beta").unwrap(), Some(b"2b".to_vec()));
        assert_eq!(store.get("gamma").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);

        store.close().unwrap();
    }
}

/// # Scenario
/// `delete` diverges by design: the LSM engine writes a tombstone, the
/// B-Tree engine refuses the operation.
#[test]
fn delete_support_differs_between_engines() {
    let lsm_dir = TempDir::new().unwrap();
    let btree_dir = TempDir::new().unwrap();

    let lsm = LsmEngine::open(lsm_dir.path(), LsmConfig::default()).unwrap();
    lsm.put("k", b"v").unwrap();
    KvStore::delete(&lsm, "k").unwrap();
    assert_eq!(lsm.get("k").unwrap(), None);

    let btree = BtreeEngine::open(btree_dir.path(), BtreeConfig::default()).unwrap();
    btree.put("k", b"v").unwrap();
    let err = KvStore::delete(&btree, "k").unwrap_err();
    assert!(matches!(err, StoreError::Btree(_)));
    assert!(err.to_string().contains("not supported"));
    assert_eq!(btree.get("k").unwrap(), Some(b"v".to_vec()));
}

/// # Scenario
/// A put acknowledged before a crash (simulated by dropping the handle
/// without `close`) is observable after reopening — on both engines.
#[test]
fn acknowledged_writes_survive_reopen() {
    let lsm_dir = TempDir::new().unwrap();
    let btree_dir = TempDir::new().unwrap();

    {
        let lsm = LsmEngine::open(lsm_dir.path(), LsmConfig::default()).unwrap();
        let btree = BtreeEngine::open(btree_dir.path(), BtreeConfig::default()).unwrap();
        for i in 0..25 {
            lsm.put(&format!("key_{i:02}"), format!("lsm_{i:02}").as_bytes())
                .unwrap();
            btree
                .put(&format!("key_{i:02}"), format!("bt_{i:02}").as_bytes())
                .unwrap();
        }
    }

    let lsm = LsmEngine::open(lsm_dir.path(), LsmConfig::default()).unwrap();
    let btree = BtreeEngine::open(btree_dir.path(), BtreeConfig::default()).unwrap();
    for i in 0..25 {
        assert_eq!(
            lsm.get(&format!("key_{i:02}")).unwrap(),
            Some(format!("lsm_{i:02}").into_bytes())
        );
        assert_eq!(
            btree.get(&format!("key_{i:02}")).unwrap(),
            Some(format!("bt_{i:02}").into_bytes())
        );
    }
}

/// # Scenario
/// Engine handles are cloneable and usable from several threads; the
/// internal monitor serializes every operation.
#[test]
fn cloned_handles_share_one_store() {
    let dir = TempDir::new().unwrap();
    let engine = LsmEngine::open(dir.path(), LsmConfig::default()).unwrap();

    let mut threads = Vec::new();
    for t in 0..4 {
        let engine = engine.clone();
        threads.push(std::thread::spawn(move || {
            for i in 0..25 {
                engine
                    .put(&format!("t{t}_k{i:02}"), format!("t{t}_v{i:02}").as_bytes())
                    .unwrap();
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..25 {
            assert_eq!(
                engine.get(&format!("t{t}_k{i:02}")).unwrap(),
                Some(format!("t{t}_v{i:02}").into_bytes())
            );
        }
    }
}

/// # Scenario
/// Default LSM tuning is deliberately tiny: a handful of writes flows
/// through flush and compaction without any manual trigger, and the
/// data stays correct end to end.
#[test]
fn default_lsm_tuning_exercises_the_full_stack() {
    let dir = TempDir::new().unwrap();
    let engine = LsmEngine::open(dir.path(), LsmConfig::default()).unwrap();

    for i in 0..100 {
        engine
            .put(&format!("key_{i:03}"), format!("val_{i:03}").as_bytes())
            .unwrap();
    }
    for i in (0..100).step_by(3) {
        engine.delete(&format!("key_{i:03}")).unwrap();
    }

    for i in 0..100 {
        let expected = if i % 3 == 0 {
            None
        } else {
            Some(format!("val_{i:03}").into_bytes())
        };
        assert_eq!(engine.get(&format!("key_{i:03}")).unwrap(), expected);
    }

    engine.close().unwrap();
    let engine = LsmEngine::open(dir.path(), LsmConfig::default()).unwrap();
    for i in 0..100 {
        let expected = if i % 3 == 0 {
            None
        } else {
            Some(format!("val_{i:03}").into_bytes())
        };
        assert_eq!(engine.get(&format!("key_{i:03}")).unwrap(), expected);
    }
}

/// # Scenario
/// Keys shared across many splits in the B-Tree engine keep exact
/// lookups through close and reopen.
#[test]
fn btree_splits_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = BtreeConfig {
        max_keys_per_page: 3,
        ..BtreeConfig::default()
    };

    {
        let engine = BtreeEngine::open(dir.path(), config.clone()).unwrap();
        for i in 0..64 {
            engine
                .put(&format!("key_{i:03}"), format!("val_{i:03}").as_bytes())
                .unwrap();
        }
        engine.close().unwrap();
    }

    let engine = BtreeEngine::open(dir.path(), config).unwrap();
    for i in 0..64 {
        assert_eq!(
            engine.get(&format!("key_{i:03}")).unwrap(),
            Some(format!("val_{i:03}").into_bytes())
        );
    }
}
