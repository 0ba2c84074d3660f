//! B-tree operations.

use crate::error::{Result, StoreError};
use crate::pager::{PageId, PAGE_HEADER_SIZE};

use super::cursor::{Cursor, Scan};
use super::node::Node;
use super::{NodeSink, NodeSource};

/// Largest accepted key in bytes
pub const MAX_KEY_SIZE: usize = 32 * 1024;

/// Largest accepted value in bytes
pub const MAX_VALUE_SIZE: usize = (u32::MAX - 1) as usize;

/// (smallest key, page) pair describing a stored subtree
type Piece = (Vec<u8>, PageId);

/// Handle to one tree, identified by its current root page
///
/// Mutations replace the root; callers persist `root()` wherever the tree
/// is referenced from (directory entry or meta page).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    root: PageId,
}

impl BTree {
    /// Allocate an empty tree
    pub fn create<S: NodeSink + ?Sized>(sink: &mut S) -> Result<Self> {
        let root = sink.store(Node::empty_leaf())?;
        Ok(Self { root })
    }

    /// Handle for an existing tree
    pub fn open(root: PageId) -> Self {
        Self { root }
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Point lookup
    pub fn get<S: NodeSource + ?Sized>(&self, source: &S, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut id = self.root;
        loop {
            let node = source.load(id)?;
            match &*node {
                Node::Branch(children) => id = children[child_index(children, key)].1,
                Node::Leaf(entries) => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                        .ok()
                        .map(|i| entries[i].1.clone()));
                }
            }
        }
    }

    /// Ordered scan over the tree
    pub fn cursor<'a, S: NodeSource>(&self, source: &'a S, scan: Scan) -> Cursor<'a> {
        Cursor::new(source, self.root, scan)
    }

    /// Number of levels, 1 for a lone leaf
    pub fn height<S: NodeSource + ?Sized>(&self, source: &S) -> Result<usize> {
        let mut height = 1;
        let mut id = self.root;
        while let Node::Branch(children) = &*source.load(id)? {
            id = children[0].1;
            height += 1;
        }
        Ok(height)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or overwrite `key`
    pub fn insert<S: NodeSink + ?Sized>(
        &mut self,
        sink: &mut S,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(StoreError::ValueTooLarge);
        }

        let pieces = insert_into(sink, self.root, key, value)?;
        self.root = grow_root(sink, pieces)?;
        Ok(())
    }

    /// Remove `key`; returns false (and changes nothing) if it was absent
    pub fn remove<S: NodeSink + ?Sized>(&mut self, sink: &mut S, key: &[u8]) -> Result<bool> {
        check_key(key)?;

        let Some(mut node) = remove_from(sink, self.root, key)? else {
            return Ok(false);
        };
        sink.discard(self.root)?;

        // Collapse single-child branches at the top
        loop {
            let child = match &node {
                Node::Branch(children) if children.len() == 1 => children[0].1,
                _ => break,
            };
            let next = sink.load(child)?;
            match &*next {
                Node::Branch(grandchildren) if grandchildren.len() == 1 => {
                    sink.discard(child)?;
                    node = (*next).clone();
                }
                _ => {
                    self.root = child;
                    return Ok(true);
                }
            }
        }

        let pieces = store_split(sink, node)?;
        self.root = grow_root(sink, pieces)?;
        Ok(true)
    }

    /// Free every page of the tree; returns the number of nodes freed
    pub fn destroy<S: NodeSink + ?Sized>(self, sink: &mut S) -> Result<usize> {
        let mut stack = vec![self.root];
        let mut freed = 0;
        while let Some(id) = stack.pop() {
            if let Node::Branch(children) = &*sink.load(id)? {
                stack.extend(children.iter().map(|(_, child)| *child));
            }
            sink.discard(id)?;
            freed += 1;
        }
        Ok(freed)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::KeyTooLarge);
    }
    Ok(())
}

/// Index of the child whose subtree may hold `key`
pub(super) fn child_index(children: &[(Vec<u8>, PageId)], key: &[u8]) -> usize {
    match children.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    }
}

/// Page body capacity for nodes
fn capacity<S: NodeSource + ?Sized>(source: &S) -> usize {
    source.page_size() - PAGE_HEADER_SIZE
}

/// Split `node` to fit, store the pieces, and describe them for the parent
fn store_split<S: NodeSink + ?Sized>(sink: &mut S, node: Node) -> Result<Vec<Piece>> {
    let cap = capacity(&*sink);
    node.split(cap)
        .into_iter()
        .map(|piece| {
            let key = piece.first_key().to_vec();
            let id = sink.store(piece)?;
            Ok((key, id))
        })
        .collect()
}

/// Turn the pieces of a rewritten root into a single root, adding levels
/// while the root itself keeps splitting
fn grow_root<S: NodeSink + ?Sized>(sink: &mut S, mut pieces: Vec<Piece>) -> Result<PageId> {
    while pieces.len() > 1 {
        pieces = store_split(sink, Node::Branch(pieces))?;
    }
    pieces
        .pop()
        .map(|(_, id)| id)
        .ok_or_else(|| StoreError::corruption("tree rewrite produced no root"))
}

fn insert_into<S: NodeSink + ?Sized>(
    sink: &mut S,
    id: PageId,
    key: &[u8],
    value: &[u8],
) -> Result<Vec<Piece>> {
    let mut node = (*sink.load(id)?).clone();

    match &mut node {
        Node::Leaf(entries) => match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(i) => entries[i].1 = value.to_vec(),
            Err(i) => entries.insert(i, (key.to_vec(), value.to_vec())),
        },
        Node::Branch(children) => {
            let i = child_index(children, key);
            let pieces = insert_into(sink, children[i].1, key, value)?;
            children.splice(i..=i, pieces);
        }
    }

    sink.discard(id)?;
    store_split(sink, node)
}

/// Remove `key` below `id`. Returns the rewritten (not yet stored) node, or
/// None if the key is absent.
fn remove_from<S: NodeSink + ?Sized>(sink: &mut S, id: PageId, key: &[u8]) -> Result<Option<Node>> {
    let node = sink.load(id)?;

    match &*node {
        Node::Leaf(entries) => {
            let Ok(i) = entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) else {
                return Ok(None);
            };
            let mut entries = entries.clone();
            entries.remove(i);
            Ok(Some(Node::Leaf(entries)))
        }
        Node::Branch(children) => {
            let i = child_index(children, key);
            let child_id = children[i].1;
            let Some(child) = remove_from(sink, child_id, key)? else {
                return Ok(None);
            };
            let mut children = children.clone();
            sink.discard(child_id)?;
            rebalance(sink, &mut children, i, child)?;
            Ok(Some(Node::Branch(children)))
        }
    }
}

/// Place the rewritten child at `i` back under its parent, borrowing from or
/// merging with a sibling if it fell below the fill threshold
fn rebalance<S: NodeSink + ?Sized>(
    sink: &mut S,
    children: &mut Vec<Piece>,
    i: usize,
    child: Node,
) -> Result<()> {
    let page_size = sink.page_size();

    if children.len() > 1 && child.is_empty() {
        children.remove(i);
        return Ok(());
    }
    if children.len() == 1 || !child.underflows(page_size) {
        let pieces = store_split(sink, child)?;
        children.splice(i..=i, pieces);
        return Ok(());
    }

    // Pair the child with its left sibling, or its right one at index 0
    let (left_at, sibling_at) = if i > 0 { (i - 1, i - 1) } else { (i, i + 1) };
    let sibling_id = children[sibling_at].1;
    let sibling = (*sink.load(sibling_id)?).clone();
    sink.discard(sibling_id)?;

    let sibling_is_left = sibling_at < i;
    let (mut left, mut right) = if sibling_is_left {
        (sibling, child)
    } else {
        (child, sibling)
    };

    let pieces = if sibling_is_left && left.can_lend(false, page_size) {
        left.shift_last_to(&mut right)?;
        let mut pieces = store_split(sink, left)?;
        pieces.extend(store_split(sink, right)?);
        pieces
    } else if !sibling_is_left && right.can_lend(true, page_size) {
        left.take_first_from(&mut right)?;
        let mut pieces = store_split(sink, left)?;
        pieces.extend(store_split(sink, right)?);
        pieces
    } else {
        left.append(right)?;
        store_split(sink, left)?
    };

    children.splice(left_at..=left_at + 1, pieces);
    Ok(())
}
