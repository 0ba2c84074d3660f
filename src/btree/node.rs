//! B-tree nodes and their page encoding.
//!
//! ```text
//! Leaf body:   [KeyLen: u32][ValLen: u32][Key][Value] ... (count items)
//! Branch body: [KeyLen: u32][Child: u64][Key] ...        (count items)
//! ```
//!
//! Branch items are keyed by the smallest key in the child's subtree.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, StoreError};
use crate::pager::{pages_for, seal, PageHeader, PageId, PageKind, PAGE_HEADER_SIZE};

/// Per-item overhead of a leaf entry: key length + value length
const LEAF_ITEM_OVERHEAD: usize = 8;

/// Per-item overhead of a branch entry: key length + child page id
const BRANCH_ITEM_OVERHEAD: usize = 12;

/// Fewest children a non-root branch keeps before it rebalances
pub const MIN_BRANCH_ITEMS: usize = 2;

/// An immutable B-tree node as loaded from (or destined for) a page run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Sorted key/value entries
    Leaf(Vec<(Vec<u8>, Vec<u8>)>),
    /// Sorted (smallest subtree key, child page) pairs
    Branch(Vec<(Vec<u8>, PageId)>),
}

impl Node {
    /// An empty leaf (the root of an empty tree)
    pub fn empty_leaf() -> Self {
        Node::Leaf(Vec::new())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries.len(),
            Node::Branch(children) => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest key in this node, empty for an empty leaf
    pub fn first_key(&self) -> &[u8] {
        match self {
            Node::Leaf(entries) => entries.first().map(|(k, _)| k.as_slice()),
            Node::Branch(children) => children.first().map(|(k, _)| k.as_slice()),
        }
        .unwrap_or(&[])
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    /// Encoded body size in bytes (excluding the page header)
    pub fn encoded_size(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries
                .iter()
                .map(|(k, v)| LEAF_ITEM_OVERHEAD + k.len() + v.len())
                .sum(),
            Node::Branch(children) => children
                .iter()
                .map(|(k, _)| BRANCH_ITEM_OVERHEAD + k.len())
                .sum(),
        }
    }

    /// Pages this node occupies once encoded
    pub fn span(&self, page_size: usize) -> u64 {
        pages_for(self.encoded_size(), page_size)
    }

    /// Below this body size a non-root node is rebalanced
    pub fn fill_threshold(page_size: usize) -> usize {
        page_size / 4
    }

    /// Whether this non-root node is too sparse and needs rebalancing
    pub fn underflows(&self, page_size: usize) -> bool {
        if self.is_empty() {
            return true;
        }
        if !self.is_leaf() && self.len() < MIN_BRANCH_ITEMS {
            return true;
        }
        self.encoded_size() < Self::fill_threshold(page_size)
    }

    /// Whether this node can give up its first (`front`) or last item and
    /// still not underflow
    pub fn can_lend(&self, front: bool, page_size: usize) -> bool {
        let min_items = if self.is_leaf() { 1 } else { MIN_BRANCH_ITEMS };
        if self.len() <= min_items {
            return false;
        }
        let item = if front {
            self.item_size(0)
        } else {
            self.item_size(self.len() - 1)
        };
        self.encoded_size() - item >= Self::fill_threshold(page_size)
    }

    fn item_size(&self, index: usize) -> usize {
        match self {
            Node::Leaf(entries) => {
                let (k, v) = &entries[index];
                LEAF_ITEM_OVERHEAD + k.len() + v.len()
            }
            Node::Branch(children) => BRANCH_ITEM_OVERHEAD + children[index].0.len(),
        }
    }

    // =========================================================================
    // Structural Helpers
    // =========================================================================

    /// Split into nodes whose bodies fit `capacity`, always at the median
    /// item. A single oversized item stays alone in a multi-page node, and
    /// branch pieces keep at least `MIN_BRANCH_ITEMS` children.
    pub fn split(self, capacity: usize) -> Vec<Node> {
        let min_len = if self.is_leaf() { 2 } else { 2 * MIN_BRANCH_ITEMS };
        if self.len() < min_len || self.encoded_size() <= capacity {
            return vec![self];
        }

        let (left, right) = match self {
            Node::Leaf(mut entries) => {
                let right = entries.split_off(entries.len() / 2);
                (Node::Leaf(entries), Node::Leaf(right))
            }
            Node::Branch(mut children) => {
                let right = children.split_off(children.len() / 2);
                (Node::Branch(children), Node::Branch(right))
            }
        };

        let mut pieces = left.split(capacity);
        pieces.extend(right.split(capacity));
        pieces
    }

    /// Append all items of `other` (which must sort after `self`)
    pub fn append(&mut self, other: Node) -> Result<()> {
        match (self, other) {
            (Node::Leaf(a), Node::Leaf(b)) => a.extend(b),
            (Node::Branch(a), Node::Branch(b)) => a.extend(b),
            _ => return Err(StoreError::corruption("sibling nodes at different depths")),
        }
        Ok(())
    }

    /// Move the last item of `self` to the front of `right`
    pub fn shift_last_to(&mut self, right: &mut Node) -> Result<()> {
        match (self, right) {
            (Node::Leaf(a), Node::Leaf(b)) => {
                if let Some(item) = a.pop() {
                    b.insert(0, item);
                }
            }
            (Node::Branch(a), Node::Branch(b)) => {
                if let Some(item) = a.pop() {
                    b.insert(0, item);
                }
            }
            _ => return Err(StoreError::corruption("sibling nodes at different depths")),
        }
        Ok(())
    }

    /// Move the first item of `right` to the end of `self`
    pub fn take_first_from(&mut self, right: &mut Node) -> Result<()> {
        match (self, right) {
            (Node::Leaf(a), Node::Leaf(b)) if !b.is_empty() => a.push(b.remove(0)),
            (Node::Branch(a), Node::Branch(b)) if !b.is_empty() => a.push(b.remove(0)),
            (Node::Leaf(_), Node::Leaf(_)) | (Node::Branch(_), Node::Branch(_)) => {}
            _ => return Err(StoreError::corruption("sibling nodes at different depths")),
        }
        Ok(())
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Encode into a sealed page image for page `id`
    pub fn encode(&self, id: PageId, page_size: usize) -> Result<Vec<u8>> {
        let mut body = BytesMut::with_capacity(self.encoded_size());
        let kind = match self {
            Node::Leaf(entries) => {
                for (key, value) in entries {
                    body.put_u32_le(key.len() as u32);
                    body.put_u32_le(value.len() as u32);
                    body.put_slice(key);
                    body.put_slice(value);
                }
                PageKind::Leaf
            }
            Node::Branch(children) => {
                for (key, child) in children {
                    body.put_u32_le(key.len() as u32);
                    body.put_u64_le(*child);
                    body.put_slice(key);
                }
                PageKind::Branch
            }
        };
        seal(id, kind, self.len() as u32, &body, page_size, 1)
    }

    /// Decode a verified page run
    pub fn decode(header: &PageHeader, buf: &[u8]) -> Result<Self> {
        let mut input = &buf[PAGE_HEADER_SIZE..];
        let count = header.count as usize;

        match header.kind {
            PageKind::Leaf => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    need(&input, LEAF_ITEM_OVERHEAD, header.id)?;
                    let key_len = input.get_u32_le() as usize;
                    let val_len = input.get_u32_le() as usize;
                    need(&input, key_len + val_len, header.id)?;
                    let key = input[..key_len].to_vec();
                    input.advance(key_len);
                    let value = input[..val_len].to_vec();
                    input.advance(val_len);
                    entries.push((key, value));
                }
                check_sorted(entries.iter().map(|(k, _)| k.as_slice()), header.id)?;
                Ok(Node::Leaf(entries))
            }
            PageKind::Branch => {
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    need(&input, BRANCH_ITEM_OVERHEAD, header.id)?;
                    let key_len = input.get_u32_le() as usize;
                    let child = input.get_u64_le();
                    need(&input, key_len, header.id)?;
                    let key = input[..key_len].to_vec();
                    input.advance(key_len);
                    children.push((key, child));
                }
                if children.is_empty() {
                    return Err(StoreError::corruption(format!(
                        "branch page {} has no children",
                        header.id
                    )));
                }
                check_sorted(children.iter().map(|(k, _)| k.as_slice()), header.id)?;
                Ok(Node::Branch(children))
            }
            other => Err(StoreError::corruption(format!(
                "page {} is {:?}, expected a tree node",
                header.id, other
            ))),
        }
    }
}

fn need(input: &&[u8], len: usize, id: PageId) -> Result<()> {
    if input.remaining() < len {
        return Err(StoreError::corruption(format!(
            "node on page {} overruns its page run",
            id
        )));
    }
    Ok(())
}

fn check_sorted<'a>(mut keys: impl Iterator<Item = &'a [u8]>, id: PageId) -> Result<()> {
    let Some(mut prev) = keys.next() else {
        return Ok(());
    };
    for key in keys {
        if key <= prev {
            return Err(StoreError::corruption(format!(
                "keys out of order on page {}",
                id
            )));
        }
        prev = key;
    }
    Ok(())
}
