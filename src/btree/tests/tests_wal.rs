//! Page-WAL tests: CRC-protected replay, torn tails, sanity bounds.

#[cfg(test)]
mod tests {
    use crate::btree::pagefile::PageFile;
    use crate::btree::tests::helpers::init_tracing;
    use crate::btree::wal::{PageWal, PageWalError};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 64;

    fn page(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    /// On-disk record length: header + image + CRC.
    const RECORD_LEN: u64 = 8 + PAGE_SIZE as u64 + 4;

    #[test]
    fn replay_applies_images_in_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();
        let mut wal = PageWal::open(tmp.path().join("wal.log")).unwrap();

        wal.append_page(0, &page(0x01)).unwrap();
        wal.append_page(1, &page(0x02)).unwrap();
        wal.append_page(0, &page(0x03)).unwrap(); // later image wins
        wal.sync().unwrap();

        let applied = wal.replay_into(&pf).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(pf.read_page(0).unwrap(), page(0x03));
        assert_eq!(pf.read_page(1).unwrap(), page(0x02));
    }

    #[test]
    fn replay_of_empty_wal_applies_nothing() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();
        let mut wal = PageWal::open(tmp.path().join("wal.log")).unwrap();

        assert_eq!(wal.replay_into(&pf).unwrap(), 0);
    }

    #[test]
    fn replay_is_idempotent() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();
        let mut wal = PageWal::open(tmp.path().join("wal.log")).unwrap();

        wal.append_page(0, &page(0x11)).unwrap();
        wal.sync().unwrap();

        assert_eq!(wal.replay_into(&pf).unwrap(), 1);
        assert_eq!(wal.replay_into(&pf).unwrap(), 1);
        assert_eq!(pf.read_page(0).unwrap(), page(0x11));
    }

    #[test]
    fn reset_truncates_to_zero_bytes() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();
        let mut wal = PageWal::open(tmp.path().join("wal.log")).unwrap();

        wal.append_page(0, &page(0x11)).unwrap();
        wal.sync().unwrap();
        wal.reset().unwrap();

        assert_eq!(wal.file_size().unwrap(), 0);
        assert_eq!(wal.replay_into(&pf).unwrap(), 0);
    }

    // ----------------------------------------------------------------
    // Torn tails
    // ----------------------------------------------------------------

    #[test]
    fn torn_tail_drops_only_last_image() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal.log");

        {
            let mut wal = PageWal::open(&path).unwrap();
            wal.append_page(0, &page(0x01)).unwrap();
            wal.append_page(1, &page(0x02)).unwrap();
            wal.append_page(2, &page(0x03)).unwrap();
            wal.sync().unwrap();
        }

        // Cut anywhere inside the last record.
        for cut_back in 1..RECORD_LEN {
            let dir = TempDir::new().unwrap();
            let pf = PageFile::open(dir.path().join("btree.data"), PAGE_SIZE).unwrap();

            let wal_copy = dir.path().join("wal.log");
            std::fs::copy(&path, &wal_copy).unwrap();
            let f = OpenOptions::new().write(true).open(&wal_copy).unwrap();
            f.set_len(3 * RECORD_LEN - cut_back).unwrap();
            drop(f);

            let mut wal = PageWal::open(&wal_copy).unwrap();
            assert_eq!(wal.replay_into(&pf).unwrap(), 2, "cut back {cut_back}");
            assert_eq!(pf.read_page(0).unwrap(), page(0x01));
            assert_eq!(pf.read_page(1).unwrap(), page(0x02));
            assert!(!pf.contains_page(2).unwrap());
        }
    }

    #[test]
    fn corrupted_tail_checksum_stops_replay_cleanly() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal.log");
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        let mut wal = PageWal::open(&path).unwrap();
        wal.append_page(0, &page(0x01)).unwrap();
        wal.append_page(1, &page(0x02)).unwrap();
        wal.sync().unwrap();

        // Flip a byte inside the last record's image.
        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::End(-10)).unwrap();
        f.write_all(&[0xFF]).unwrap();
        drop(f);

        let mut wal = PageWal::open(&path).unwrap();
        assert_eq!(wal.replay_into(&pf).unwrap(), 1);
        assert_eq!(pf.read_page(0).unwrap(), page(0x01));
        assert!(!pf.contains_page(1).unwrap());
    }

    // ----------------------------------------------------------------
    // Sanity bounds
    // ----------------------------------------------------------------

    #[test]
    fn out_of_bounds_page_size_fails_replay() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal.log");
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        let mut wal = PageWal::open(&path).unwrap();
        wal.append_page(0, &page(0x01)).unwrap();
        wal.sync().unwrap();

        // Overwrite the pageSize field with 2_000_000.
        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(4)).unwrap();
        f.write_all(&2_000_000u32.to_be_bytes()).unwrap();
        drop(f);

        let mut wal = PageWal::open(&path).unwrap();
        let err = wal.replay_into(&pf).unwrap_err();
        assert!(matches!(err, PageWalError::Corrupt { .. }));
    }

    #[test]
    fn mismatched_page_size_fails_replay() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wal.log");

        {
            let mut wal = PageWal::open(&path).unwrap();
            wal.append_page(0, &page(0x01)).unwrap();
            wal.sync().unwrap();
        }

        // Same log, replayed against a page file with a different
        // page size: corruption, not a torn tail.
        let pf = PageFile::open(tmp.path().join("other.data"), PAGE_SIZE * 2).unwrap();
        let mut wal = PageWal::open(&path).unwrap();
        let err = wal.replay_into(&pf).unwrap_err();
        assert!(matches!(err, PageWalError::Corrupt { .. }));
    }

    #[test]
    fn oversized_image_is_rejected_at_append() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mut wal = PageWal::open(tmp.path().join("wal.log")).unwrap();

        let err = wal.append_page(0, &vec![0u8; 1_000_001]).unwrap_err();
        assert!(matches!(err, PageWalError::RecordTooLarge(_)));
        assert_eq!(wal.file_size().unwrap(), 0);
    }
}
