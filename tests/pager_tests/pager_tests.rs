//! Tests for the page layer
//!
//! These tests verify:
//! - Page images: header layout, padding, checksums, overflow runs
//! - Meta page encoding and validation
//! - Freelist allocation, deferred release and persistence
//! - PageFile positioned I/O and file locking

use bucketkv::pager::{
    pages_for, seal, FreeList, Meta, PageFile, PageHeader, PageKind, FORMAT_VERSION, MAGIC,
    PAGE_HEADER_SIZE,
};
use bucketkv::StoreError;
use tempfile::TempDir;

const PAGE_SIZE: usize = 512;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_file() -> (TempDir, PageFile) {
    let temp_dir = TempDir::new().unwrap();
    let file = PageFile::open(&temp_dir.path().join("pages.db"), PAGE_SIZE, false).unwrap();
    (temp_dir, file)
}

// =============================================================================
// Page Image Tests
// =============================================================================

#[test]
fn test_pages_for_rounds_up() {
    assert_eq!(pages_for(0, PAGE_SIZE), 1);
    assert_eq!(pages_for(PAGE_SIZE - PAGE_HEADER_SIZE, PAGE_SIZE), 1);
    assert_eq!(pages_for(PAGE_SIZE - PAGE_HEADER_SIZE + 1, PAGE_SIZE), 2);
    assert_eq!(pages_for(3 * PAGE_SIZE, PAGE_SIZE), 4);
}

#[test]
fn test_seal_pads_to_whole_pages() {
    let image = seal(7, PageKind::Leaf, 3, b"body", PAGE_SIZE, 1).unwrap();

    assert_eq!(image.len(), PAGE_SIZE);
    assert_eq!(&image[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4], b"body");
    assert!(image[PAGE_HEADER_SIZE + 4..].iter().all(|&b| b == 0));

    let header = PageHeader::verify(&image, 7, PAGE_SIZE).unwrap();
    assert_eq!(header.kind, PageKind::Leaf);
    assert_eq!(header.count, 3);
    assert_eq!(header.overflow, 0);
}

#[test]
fn test_seal_respects_min_span() {
    let image = seal(4, PageKind::Freelist, 0, b"", PAGE_SIZE, 3).unwrap();

    assert_eq!(image.len(), 3 * PAGE_SIZE);
    assert_eq!(PageHeader::read_from(&image).unwrap().span(), 3);
}

#[test]
fn test_overflow_run_checksum_covers_every_page() {
    let body = vec![0xAB; 2 * PAGE_SIZE];
    let mut image = seal(9, PageKind::Leaf, 1, &body, PAGE_SIZE, 1).unwrap();
    assert_eq!(PageHeader::read_from(&image).unwrap().span(), 3);

    let last = image.len() - 1;
    image[last] ^= 0xFF;

    let err = PageHeader::verify(&image, 9, PAGE_SIZE).unwrap_err();
    assert!(matches!(err, StoreError::Corruption(_)));
}

#[test]
fn test_verify_rejects_wrong_page_id() {
    let image = seal(5, PageKind::Branch, 0, b"x", PAGE_SIZE, 1).unwrap();

    let err = PageHeader::verify(&image, 6, PAGE_SIZE).unwrap_err();
    assert!(matches!(err, StoreError::Corruption(_)));
}

#[test]
fn test_unknown_page_kind_is_corruption() {
    let mut image = seal(2, PageKind::Leaf, 0, b"", PAGE_SIZE, 1).unwrap();
    image[8] = 0x7F;

    assert!(matches!(
        PageHeader::read_from(&image),
        Err(StoreError::Corruption(_))
    ));
}

// =============================================================================
// Meta Tests
// =============================================================================

#[test]
fn test_meta_encode_decode() {
    let meta = Meta {
        txid: 42,
        root: 17,
        freelist: 12,
        page_count: 30,
        ..Meta::initial(PAGE_SIZE)
    };

    let image = meta.encode(meta.slot()).unwrap();
    let decoded = Meta::decode(&image).unwrap();

    assert_eq!(decoded, meta);
    assert_eq!(decoded.magic, MAGIC);
    assert_eq!(decoded.version, FORMAT_VERSION);
    assert_eq!(meta.slot(), 0);
}

#[test]
fn test_meta_decode_from_short_probe() {
    let meta = Meta::initial(4096);
    let image = meta.encode(0).unwrap();

    let decoded = Meta::decode(&image[..256]).unwrap();
    assert_eq!(decoded.page_size, 4096);
}

#[test]
fn test_meta_checksum_mismatch() {
    let meta = Meta::initial(PAGE_SIZE);
    let mut image = meta.encode(0).unwrap();
    // Flip a byte inside the serialized txid
    image[PAGE_HEADER_SIZE + 12] ^= 0x01;

    assert!(matches!(Meta::decode(&image), Err(StoreError::Corruption(_))));
}

#[test]
fn test_meta_rejects_bad_magic() {
    let meta = Meta {
        magic: 0xDEAD_BEEF,
        ..Meta::initial(PAGE_SIZE)
    };
    let image = meta.encode(0).unwrap();

    assert!(matches!(Meta::decode(&image), Err(StoreError::Corruption(_))));
}

#[test]
fn test_meta_rejects_root_outside_file() {
    let meta = Meta {
        root: 99,
        ..Meta::initial(PAGE_SIZE)
    };
    assert!(meta.validate().is_err());
}

#[test]
fn test_meta_rejects_non_meta_page() {
    let image = seal(0, PageKind::Leaf, 0, b"", PAGE_SIZE, 1).unwrap();
    assert!(matches!(Meta::decode(&image), Err(StoreError::Corruption(_))));
}

// =============================================================================
// FreeList Tests
// =============================================================================

#[test]
fn test_freelist_allocates_lowest_first() {
    let mut freelist = FreeList::from_ids([9, 4, 6]);

    assert_eq!(freelist.allocate(1), Some(4));
    assert_eq!(freelist.allocate(1), Some(6));
    assert_eq!(freelist.allocate(1), Some(9));
    assert_eq!(freelist.allocate(1), None);
}

#[test]
fn test_freelist_allocates_contiguous_runs() {
    let mut freelist = FreeList::from_ids([3, 5, 6, 8, 9, 10]);

    assert_eq!(freelist.allocate(3), Some(8));
    assert_eq!(freelist.allocate(2), Some(5));
    assert_eq!(freelist.allocate(2), None);
    assert_eq!(freelist.free_count(), 1);
}

#[test]
fn test_freelist_pending_until_release() {
    let mut freelist = FreeList::new();
    freelist.free(5, 20, 1).unwrap();
    freelist.free(7, 21, 2).unwrap();

    assert_eq!(freelist.pending_count(), 3);
    assert_eq!(freelist.allocate(1), None);

    assert_eq!(freelist.release(5), 1);
    assert!(freelist.is_free(20));
    assert!(!freelist.is_free(21));

    assert_eq!(freelist.release(10), 2);
    assert_eq!(freelist.pending_count(), 0);
    assert_eq!(freelist.free_count(), 3);
}

#[test]
fn test_freelist_free_now_is_immediate() {
    let mut freelist = FreeList::new();
    freelist.free_now(11, 2).unwrap();

    assert_eq!(freelist.allocate(2), Some(11));
}

#[test]
fn test_freelist_double_free_is_corruption() {
    let mut freelist = FreeList::from_ids([4]);

    assert!(matches!(freelist.free(1, 4, 1), Err(StoreError::Corruption(_))));
    assert!(matches!(freelist.free_now(3, 2), Err(StoreError::Corruption(_))));
}

#[test]
fn test_freelist_persists_pending_as_free() {
    let mut freelist = FreeList::from_ids([2, 9]);
    freelist.free(3, 5, 2).unwrap();

    let body = freelist.encode().unwrap();
    assert_eq!(body.len(), FreeList::encoded_len(4));

    let mut decoded = FreeList::decode(&body).unwrap();
    assert_eq!(decoded.all_ids(), vec![2, 5, 6, 9]);
    assert_eq!(decoded.pending_count(), 0);
    assert_eq!(decoded.allocate(2), Some(5));
}

// =============================================================================
// PageFile Tests
// =============================================================================

#[test]
fn test_page_file_write_read_run() {
    let (_temp, file) = setup_temp_file();
    let body = vec![7u8; PAGE_SIZE + 100];
    let image = seal(3, PageKind::Leaf, 1, &body, PAGE_SIZE, 1).unwrap();

    file.write_run(3, &image).unwrap();
    let (header, buf) = file.read_run(3).unwrap();

    assert_eq!(header.span(), 2);
    assert_eq!(buf, image);
    assert_eq!(file.read_header(3).unwrap(), header);
    assert_eq!(file.len().unwrap(), 5 * PAGE_SIZE as u64);
}

#[test]
fn test_page_file_read_past_end_is_corruption() {
    let (_temp, file) = setup_temp_file();

    assert!(file.is_empty().unwrap());
    assert!(matches!(file.read_run(4), Err(StoreError::Corruption(_))));
}

#[test]
fn test_page_file_ensure_pages_grows_only() {
    let (_temp, file) = setup_temp_file();

    file.ensure_pages(8).unwrap();
    assert_eq!(file.len().unwrap(), 8 * PAGE_SIZE as u64);

    file.ensure_pages(2).unwrap();
    assert_eq!(file.len().unwrap(), 8 * PAGE_SIZE as u64);
}

#[test]
fn test_page_file_exclusive_lock() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("locked.db");

    let _first = PageFile::open(&path, PAGE_SIZE, false).unwrap();
    let second = PageFile::open(&path, PAGE_SIZE, false);

    assert!(matches!(second, Err(StoreError::Locked(_))));
}

#[test]
fn test_page_file_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("store.db");

    let file = PageFile::open(&path, PAGE_SIZE, false).unwrap();

    assert!(path.exists());
    assert_eq!(file.path(), path.as_path());
}

#[test]
fn test_page_file_concurrent_reads_while_writing() {
    let (_temp, file) = setup_temp_file();

    // Pages 2..10 hold stable images; pages 10..14 are rewritten and synced
    let images: Vec<Vec<u8>> = (2..10u64)
        .map(|id| seal(id, PageKind::Leaf, 1, &[id as u8; 64], PAGE_SIZE, 1).unwrap())
        .collect();
    for (id, image) in (2..10u64).zip(&images) {
        file.write_run(id, image).unwrap();
    }

    crossbeam::scope(|s| {
        s.spawn(|_| {
            for round in 0..50u8 {
                for id in 10..14u64 {
                    let image = seal(id, PageKind::Leaf, 1, &[round; 64], PAGE_SIZE, 1).unwrap();
                    file.write_run(id, &image).unwrap();
                }
                file.sync().unwrap();
            }
        });

        for _ in 0..4 {
            s.spawn(|_| {
                for _ in 0..100 {
                    for (id, image) in (2..10u64).zip(&images) {
                        let (_, buf) = file.read_run(id).unwrap();
                        assert_eq!(&buf, image);
                    }
                }
            });
        }
    })
    .unwrap();
}
