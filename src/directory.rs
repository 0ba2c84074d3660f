//! Bucket Directory
//!
//! A B-tree keyed by bucket name whose values point at each bucket's own
//! tree. Its root is what the meta page records.

use serde::{Deserialize, Serialize};

use crate::btree::{BTree, NodeSink, NodeSource, Scan};
use crate::error::{Result, StoreError};
use crate::pager::PageId;

/// Directory entry for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    /// Root page of the bucket's tree
    pub root: PageId,
}

impl BucketRecord {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The bucket's tree
    pub fn tree(&self) -> BTree {
        BTree::open(self.root)
    }
}

/// The top-level name → bucket index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    tree: BTree,
}

impl Directory {
    pub fn open(root: PageId) -> Self {
        Self {
            tree: BTree::open(root),
        }
    }

    pub fn root(&self) -> PageId {
        self.tree.root()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Record for `name`, if the bucket exists
    pub fn lookup<S: NodeSource + ?Sized>(
        &self,
        source: &S,
        name: &[u8],
    ) -> Result<Option<BucketRecord>> {
        if name.is_empty() {
            return Ok(None);
        }
        self.tree
            .get(source, name)?
            .map(|bytes| BucketRecord::decode(&bytes))
            .transpose()
    }

    /// Record for `name`, or `BucketNotFound`
    pub fn require<S: NodeSource + ?Sized>(&self, source: &S, name: &[u8]) -> Result<BucketRecord> {
        self.lookup(source, name)?
            .ok_or_else(|| StoreError::BucketNotFound(bucket_label(name)))
    }

    /// All bucket names in order
    pub fn names<S: NodeSource>(&self, source: &S) -> Result<Vec<Vec<u8>>> {
        self.tree
            .cursor(source, Scan::all())
            .map(|item| item.map(|(name, _)| name))
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create an empty bucket
    pub fn create<S: NodeSink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: &[u8],
    ) -> Result<BucketRecord> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument(
                "bucket name must not be empty".to_string(),
            ));
        }
        if self.lookup(&*sink, name)?.is_some() {
            return Err(StoreError::BucketExists(bucket_label(name)));
        }

        let record = BucketRecord {
            root: BTree::create(sink)?.root(),
        };
        self.tree.insert(sink, name, &record.encode()?)?;
        Ok(record)
    }

    /// Point `name` at a new tree root after the bucket was modified
    pub fn update<S: NodeSink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: &[u8],
        record: BucketRecord,
    ) -> Result<()> {
        self.tree.insert(sink, name, &record.encode()?)
    }

    /// Delete a bucket and free every page of its tree.
    ///
    /// Returns the number of tree nodes released.
    pub fn remove<S: NodeSink + ?Sized>(&mut self, sink: &mut S, name: &[u8]) -> Result<usize> {
        let record = self.require(&*sink, name)?;
        let freed = record.tree().destroy(sink)?;
        self.tree.remove(sink, name)?;
        Ok(freed)
    }
}

/// Printable form of a bucket name for error messages
pub(crate) fn bucket_label(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}
