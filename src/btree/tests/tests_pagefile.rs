//! Page-file tests: positional reads/writes, existence checks,
//! missing pages.

#[cfg(test)]
mod tests {
    use crate::btree::pagefile::{PageFile, PageFileError};
    use crate::btree::tests::helpers::init_tracing;
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 128;

    #[test]
    fn write_then_read_round_trips() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        let page = vec![0x42u8; PAGE_SIZE];
        pf.write_page(0, &page).unwrap();
        assert_eq!(pf.read_page(0).unwrap(), page);
    }

    #[test]
    fn pages_live_at_fixed_slots() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        pf.write_page(0, &vec![0xAA; PAGE_SIZE]).unwrap();
        pf.write_page(2, &vec![0xCC; PAGE_SIZE]).unwrap();

        assert_eq!(pf.read_page(0).unwrap(), vec![0xAA; PAGE_SIZE]);
        assert_eq!(pf.read_page(2).unwrap(), vec![0xCC; PAGE_SIZE]);
        // The skipped slot exists (the file extends past it) as zeros.
        assert_eq!(pf.read_page(1).unwrap(), vec![0x00; PAGE_SIZE]);
    }

    #[test]
    fn rewrite_in_place_replaces_contents() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        pf.write_page(0, &vec![0x01; PAGE_SIZE]).unwrap();
        pf.write_page(0, &vec![0x02; PAGE_SIZE]).unwrap();
        assert_eq!(pf.read_page(0).unwrap(), vec![0x02; PAGE_SIZE]);
    }

    #[test]
    fn reading_a_missing_page_is_an_error() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        let err = pf.read_page(0).unwrap_err();
        assert!(matches!(err, PageFileError::MissingPage { id: 0 }));
    }

    #[test]
    fn contains_page_reflects_file_extent() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        assert!(!pf.contains_page(0).unwrap());
        pf.write_page(0, &vec![0; PAGE_SIZE]).unwrap();
        assert!(pf.contains_page(0).unwrap());
        assert!(!pf.contains_page(1).unwrap());
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let pf = PageFile::open(tmp.path().join("btree.data"), PAGE_SIZE).unwrap();

        let err = pf.write_page(0, &[0u8; 5]).unwrap_err();
        assert!(matches!(
            err,
            PageFileError::BadBufferLen {
                expected: PAGE_SIZE,
                got: 5
            }
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("btree.data");
        {
            let pf = PageFile::open(&path, PAGE_SIZE).unwrap();
            pf.write_page(1, &vec![0x7E; PAGE_SIZE]).unwrap();
            pf.sync().unwrap();
        }

        let pf = PageFile::open(&path, PAGE_SIZE).unwrap();
        assert_eq!(pf.read_page(1).unwrap(), vec![0x7E; PAGE_SIZE]);
    }
}
