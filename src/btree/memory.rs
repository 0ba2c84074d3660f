//! In-memory node store
//!
//! Backs a tree with a HashMap instead of a file. Used for exercising the
//! tree algorithms in isolation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::pager::PageId;

use super::node::Node;
use super::{NodeSink, NodeSource};

/// Node store that keeps every live node in a map
pub struct MemoryNodes {
    nodes: HashMap<PageId, Arc<Node>>,
    next_id: PageId,
    page_size: usize,
}

impl MemoryNodes {
    /// Create an empty store laying nodes out for `page_size`
    pub fn new(page_size: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 1,
            page_size,
        }
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl NodeSource for MemoryNodes {
    fn load(&self, id: PageId) -> Result<Arc<Node>> {
        self.nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::corruption(format!("node {} does not exist", id)))
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl NodeSink for MemoryNodes {
    fn store(&mut self, node: Node) -> Result<PageId> {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, Arc::new(node));
        Ok(id)
    }

    fn discard(&mut self, id: PageId) -> Result<()> {
        self.nodes
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::corruption(format!("double free of node {}", id)))
    }
}
