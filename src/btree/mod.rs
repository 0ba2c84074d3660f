//! B-Tree / Ordered Index Module
//!
//! Copy-on-write B-tree over pages. One tree per bucket, plus the bucket
//! directory itself.
//!
//! ## Responsibilities
//! - Point lookup, insert with overwrite, delete
//! - Median splits on overflow, borrow-or-merge on underflow
//! - Lazy, restartable ordered scans (full, prefix, start bound)
//!
//! ## Copy-on-Write
//! A node is never modified in place. Every change loads the node, builds a
//! new one, stores it on a fresh page and discards the old page, all the way
//! up to a new root. A reader holding an old root keeps seeing a complete,
//! unchanged tree; rollback is simply dropping the new pages.
//!
//! The tree never touches the file directly. It works through `NodeSource`
//! (reads) and `NodeSink` (allocation), implemented by transactions and by
//! `MemoryNodes` for tests.

mod cursor;
mod memory;
mod node;
mod tree;

use std::sync::Arc;

use crate::error::Result;
use crate::pager::PageId;

pub use cursor::{Cursor, Scan};
pub use memory::MemoryNodes;
pub use node::{Node, MIN_BRANCH_ITEMS};
pub use tree::{BTree, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Read access to tree nodes
pub trait NodeSource {
    /// Load the node stored at `id`
    fn load(&self, id: PageId) -> Result<Arc<Node>>;

    /// Page size nodes are laid out for
    fn page_size(&self) -> usize;
}

/// Allocation of tree nodes
pub trait NodeSink: NodeSource {
    /// Store `node` on newly allocated page(s), returning the first page id
    fn store(&mut self, node: Node) -> Result<PageId>;

    /// Give up the page run at `id` (the node there is no longer referenced)
    fn discard(&mut self, id: PageId) -> Result<()>;
}
