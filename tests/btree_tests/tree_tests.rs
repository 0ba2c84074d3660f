//! Tests for the copy-on-write B-tree
//!
//! These tests verify:
//! - Node page encoding, splitting and fill rules
//! - Insert / overwrite / lookup across many levels
//! - Delete with borrow and merge down to an empty tree
//! - Ordered, prefix and bounded cursor scans
//! - Freeing a whole tree

use bucketkv::btree::{BTree, MemoryNodes, Node, NodeSink, NodeSource, MAX_KEY_SIZE};
use bucketkv::pager::{PageHeader, PAGE_HEADER_SIZE};
use bucketkv::{Scan, StoreError};

const PAGE_SIZE: usize = 512;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value{:05}", i).into_bytes()
}

/// Every index in 0..n exactly once, in a scattered order
fn scattered(n: usize) -> Vec<usize> {
    // 7919 is prime and does not divide n for the sizes used here
    (0..n).map(|i| (i * 7919) % n).collect()
}

fn setup_tree(count: usize) -> (MemoryNodes, BTree) {
    let mut nodes = MemoryNodes::new(PAGE_SIZE);
    let mut tree = BTree::create(&mut nodes).unwrap();
    for i in scattered(count) {
        tree.insert(&mut nodes, &key(i), &value(i)).unwrap();
    }
    (nodes, tree)
}

fn collect_keys(nodes: &MemoryNodes, tree: &BTree, scan: Scan) -> Vec<Vec<u8>> {
    tree.cursor(nodes, scan)
        .map(|item| item.unwrap().0)
        .collect()
}

// =============================================================================
// Node Tests
// =============================================================================

#[test]
fn test_node_encode_decode_leaf() {
    let node = Node::Leaf(vec![
        (b"a".to_vec(), b"1".to_vec()),
        (b"b".to_vec(), Vec::new()),
    ]);

    let image = node.encode(6, PAGE_SIZE).unwrap();
    let header = PageHeader::verify(&image, 6, PAGE_SIZE).unwrap();

    assert_eq!(header.count, 2);
    assert_eq!(Node::decode(&header, &image).unwrap(), node);
}

#[test]
fn test_node_encode_decode_branch() {
    let node = Node::Branch(vec![(b"a".to_vec(), 10), (b"m".to_vec(), 11)]);

    let image = node.encode(4, PAGE_SIZE).unwrap();
    let header = PageHeader::verify(&image, 4, PAGE_SIZE).unwrap();

    assert_eq!(Node::decode(&header, &image).unwrap(), node);
}

#[test]
fn test_node_decode_rejects_unsorted_keys() {
    let node = Node::Leaf(vec![
        (b"b".to_vec(), b"1".to_vec()),
        (b"a".to_vec(), b"2".to_vec()),
    ]);
    let image = node.encode(3, PAGE_SIZE).unwrap();
    let header = PageHeader::read_from(&image).unwrap();

    assert!(matches!(
        Node::decode(&header, &image),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_node_decode_rejects_overrun() {
    let node = Node::Leaf(vec![(b"k".to_vec(), b"v".to_vec())]);
    let image = node.encode(3, PAGE_SIZE).unwrap();
    let mut header = PageHeader::read_from(&image).unwrap();
    // Claim far more items than the page holds
    header.count = 1000;

    assert!(matches!(
        Node::decode(&header, &image),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_node_split_fits_capacity() {
    let entries: Vec<_> = (0..100).map(|i| (key(i), value(i))).collect();
    let node = Node::Leaf(entries);
    let capacity = PAGE_SIZE - PAGE_HEADER_SIZE;

    let pieces = node.split(capacity);

    assert!(pieces.len() > 1);
    assert!(pieces.iter().all(|p| p.encoded_size() <= capacity));
    assert_eq!(pieces.iter().map(Node::len).sum::<usize>(), 100);
}

#[test]
fn test_node_split_keeps_oversized_item_alone() {
    let node = Node::Leaf(vec![
        (b"a".to_vec(), vec![0u8; 2000]),
        (b"b".to_vec(), b"small".to_vec()),
    ]);

    let pieces = node.split(PAGE_SIZE - PAGE_HEADER_SIZE);

    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].span(PAGE_SIZE), 4);
    assert_eq!(pieces[1].span(PAGE_SIZE), 1);
}

#[test]
fn test_node_underflow_rules() {
    assert!(Node::empty_leaf().underflows(PAGE_SIZE));
    assert!(Node::Branch(vec![(b"a".to_vec(), 3)]).underflows(PAGE_SIZE));

    let full: Vec<_> = (0..10).map(|i| (key(i), value(i))).collect();
    assert!(!Node::Leaf(full).underflows(PAGE_SIZE));
}

// =============================================================================
// Insert / Get Tests
// =============================================================================

#[test]
fn test_empty_tree() {
    let (nodes, tree) = setup_tree(0);

    assert_eq!(tree.get(&nodes, b"missing").unwrap(), None);
    assert_eq!(tree.height(&nodes).unwrap(), 1);
    assert!(collect_keys(&nodes, &tree, Scan::all()).is_empty());
}

#[test]
fn test_insert_and_get_many() {
    let (nodes, tree) = setup_tree(1000);

    for i in 0..1000 {
        assert_eq!(tree.get(&nodes, &key(i)).unwrap(), Some(value(i)));
    }
    assert_eq!(tree.get(&nodes, b"key99999").unwrap(), None);
    assert!(tree.height(&nodes).unwrap() >= 3);
}

#[test]
fn test_insert_overwrites() {
    let (mut nodes, mut tree) = setup_tree(50);

    tree.insert(&mut nodes, &key(7), b"replaced").unwrap();

    assert_eq!(tree.get(&nodes, &key(7)).unwrap(), Some(b"replaced".to_vec()));
    assert_eq!(collect_keys(&nodes, &tree, Scan::all()).len(), 50);
}

#[test]
fn test_empty_value_is_stored() {
    let (mut nodes, mut tree) = setup_tree(0);

    tree.insert(&mut nodes, b"k", b"").unwrap();

    assert_eq!(tree.get(&nodes, b"k").unwrap(), Some(Vec::new()));
}

#[test]
fn test_insert_rejects_bad_keys() {
    let (mut nodes, mut tree) = setup_tree(0);

    assert!(matches!(
        tree.insert(&mut nodes, b"", b"v"),
        Err(StoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        tree.insert(&mut nodes, &vec![b'k'; MAX_KEY_SIZE + 1], b"v"),
        Err(StoreError::KeyTooLarge)
    ));
}

#[test]
fn test_insert_rewrites_path_and_frees_old_nodes() {
    let (mut nodes, mut tree) = setup_tree(200);
    let before = nodes.node_count();
    let old_root = tree.root();

    tree.insert(&mut nodes, &key(100), b"new").unwrap();

    assert_ne!(tree.root(), old_root);
    assert!(nodes.load(old_root).is_err());
    assert_eq!(nodes.node_count(), before);
}

#[test]
fn test_large_values_span_pages() {
    let (mut nodes, mut tree) = setup_tree(0);
    let big = vec![0x5A; 3 * PAGE_SIZE];

    tree.insert(&mut nodes, b"big", &big).unwrap();
    for i in 0..20 {
        tree.insert(&mut nodes, &key(i), &value(i)).unwrap();
    }

    assert_eq!(tree.get(&nodes, b"big").unwrap(), Some(big));
    assert_eq!(tree.get(&nodes, &key(19)).unwrap(), Some(value(19)));
}

// =============================================================================
// Remove Tests
// =============================================================================

#[test]
fn test_remove_missing_key() {
    let (mut nodes, mut tree) = setup_tree(10);
    let root = tree.root();

    assert!(!tree.remove(&mut nodes, b"nope").unwrap());
    assert_eq!(tree.root(), root);
}

#[test]
fn test_remove_half() {
    let (mut nodes, mut tree) = setup_tree(600);

    for i in (0..600).filter(|i| i % 2 == 0) {
        assert!(tree.remove(&mut nodes, &key(i)).unwrap());
    }

    for i in 0..600 {
        let expected = if i % 2 == 0 { None } else { Some(value(i)) };
        assert_eq!(tree.get(&nodes, &key(i)).unwrap(), expected);
    }
    let keys = collect_keys(&nodes, &tree, Scan::all());
    assert_eq!(keys.len(), 300);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_remove_all_collapses_to_empty_leaf() {
    let (mut nodes, mut tree) = setup_tree(800);

    for i in scattered(800) {
        assert!(tree.remove(&mut nodes, &key(i)).unwrap());
    }

    assert_eq!(tree.height(&nodes).unwrap(), 1);
    assert_eq!(nodes.node_count(), 1);
    assert!(collect_keys(&nodes, &tree, Scan::all()).is_empty());
}

#[test]
fn test_remove_then_reinsert() {
    let (mut nodes, mut tree) = setup_tree(300);

    for i in 0..150 {
        tree.remove(&mut nodes, &key(i)).unwrap();
    }
    for i in 0..150 {
        tree.insert(&mut nodes, &key(i), b"again").unwrap();
    }

    assert_eq!(tree.get(&nodes, &key(0)).unwrap(), Some(b"again".to_vec()));
    assert_eq!(tree.get(&nodes, &key(299)).unwrap(), Some(value(299)));
    assert_eq!(collect_keys(&nodes, &tree, Scan::all()).len(), 300);
}

// =============================================================================
// Cursor Tests
// =============================================================================

#[test]
fn test_cursor_full_scan_in_order() {
    let (nodes, tree) = setup_tree(500);

    let entries: Vec<_> = tree
        .cursor(&nodes, Scan::all())
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(entries.len(), 500);
    for (i, (k, v)) in entries.into_iter().enumerate() {
        assert_eq!(k, key(i));
        assert_eq!(v, value(i));
    }
}

#[test]
fn test_cursor_prefix() {
    let (nodes, tree) = setup_tree(500);

    let keys = collect_keys(&nodes, &tree, Scan::prefix("key003"));

    assert_eq!(keys.len(), 100);
    assert_eq!(keys.first(), Some(&key(300)));
    assert_eq!(keys.last(), Some(&key(399)));
}

#[test]
fn test_cursor_prefix_without_matches() {
    let (nodes, tree) = setup_tree(100);

    assert!(collect_keys(&nodes, &tree, Scan::prefix("zzz")).is_empty());
    assert!(collect_keys(&nodes, &tree, Scan::prefix("a")).is_empty());
}

#[test]
fn test_cursor_start_bound() {
    let (nodes, tree) = setup_tree(100);

    let keys = collect_keys(&nodes, &tree, Scan::all().start_at("key00095"));
    assert_eq!(keys, (95..100).map(key).collect::<Vec<_>>());

    // A bound between keys starts at the next one
    let keys = collect_keys(&nodes, &tree, Scan::all().start_at("key00042x"));
    assert_eq!(keys.first(), Some(&key(43)));
}

#[test]
fn test_cursor_seek_and_rewind() {
    let (nodes, tree) = setup_tree(200);
    let mut cursor = tree.cursor(&nodes, Scan::all());

    assert_eq!(cursor.next().unwrap().unwrap().0, key(0));

    cursor.seek(&key(150)).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().0, key(150));
    assert_eq!(cursor.next().unwrap().unwrap().0, key(151));

    cursor.rewind();
    assert_eq!(cursor.next().unwrap().unwrap().0, key(0));
}

#[test]
fn test_cursor_seek_clamped_to_prefix() {
    let (nodes, tree) = setup_tree(300);
    let mut cursor = tree.cursor(&nodes, Scan::prefix("key002"));

    cursor.seek(b"a").unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().0, key(200));

    cursor.seek(&key(299)).unwrap();
    assert_eq!(cursor.next().unwrap().unwrap().0, key(299));
    assert!(cursor.next().is_none());
}

// =============================================================================
// Destroy Tests
// =============================================================================

#[test]
fn test_destroy_frees_every_node() {
    let (mut nodes, tree) = setup_tree(400);
    let live = nodes.node_count();

    let freed = tree.destroy(&mut nodes).unwrap();

    assert_eq!(freed, live);
    assert_eq!(nodes.node_count(), 0);
}

#[test]
fn test_memory_nodes_double_discard_is_corruption() {
    let mut nodes = MemoryNodes::new(PAGE_SIZE);
    let id = nodes.store(Node::empty_leaf()).unwrap();

    nodes.discard(id).unwrap();
    assert!(matches!(nodes.discard(id), Err(StoreError::Corruption(_))));
}
