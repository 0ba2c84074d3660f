//! Read-write transactions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::btree::{Node, NodeSink, NodeSource};
use crate::config::SyncStrategy;
use crate::directory::{BucketRecord, Directory};
use crate::error::{Result, StoreError};
use crate::pager::{pages_for, seal, FreeList, Meta, PageId, PageKind, TxId, META_PAGE_COUNT};
use crate::store::{Store, WriterState};

use super::BucketReader;

/// The single active writer
///
/// Holds the store's writer lock until `commit`, `rollback` or drop.
/// Dropping without committing rolls back: nothing this transaction wrote
/// is reachable from the committed meta.
pub struct WriteTxn<'s> {
    store: &'s Store,
    state: MutexGuard<'s, WriterState>,
    /// Committed meta this transaction started from
    base: Meta,
    txid: TxId,
    directory: Directory,
    /// Working copy of the freelist, published on commit
    freelist: FreeList,
    /// Working high-water mark
    page_count: u64,
    /// Nodes on pages allocated by this transaction
    dirty: HashMap<PageId, Arc<Node>>,
    modified: bool,
    poisoned: bool,
    finished: bool,
}

impl<'s> WriteTxn<'s> {
    pub(crate) fn begin(store: &'s Store) -> Result<Self> {
        if store.config.read_only {
            return Err(StoreError::ReadOnly);
        }

        let state = store.writer.lock();
        let base = *store.meta.read();

        // Pages freed by transactions no open snapshot predates are reusable
        let mut freelist = state.freelist.clone();
        let oldest = store.readers.lock().oldest().unwrap_or(base.txid);
        let released = freelist.release(oldest);

        let txid = base.txid + 1;
        debug!(txid, released, "write transaction started");

        Ok(Self {
            store,
            state,
            base,
            txid,
            directory: Directory::open(base.root),
            freelist,
            page_count: base.page_count,
            dirty: HashMap::new(),
            modified: false,
            poisoned: false,
            finished: false,
        })
    }

    /// Id this transaction commits as
    pub fn txid(&self) -> TxId {
        self.txid
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create an empty bucket; `BucketExists` if the name is taken
    pub fn create_bucket(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = name.as_ref();
        self.guarded(|tx| {
            let mut dir = tx.directory;
            dir.create(tx, name)?;
            tx.directory = dir;
            Ok(())
        })
    }

    /// Delete a bucket and all of its entries
    pub fn delete_bucket(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = name.as_ref();
        self.guarded(|tx| {
            let mut dir = tx.directory;
            let freed = dir.remove(tx, name)?;
            tx.directory = dir;
            debug!(txid = tx.txid, freed, "bucket tree released");
            Ok(())
        })
    }

    /// Insert or overwrite `key` in `bucket`
    pub fn put(
        &mut self,
        bucket: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let (bucket, key, value) = (bucket.as_ref(), key.as_ref(), value.as_ref());
        self.guarded(|tx| {
            let record = tx.directory.require(&*tx, bucket)?;
            let mut tree = record.tree();
            tree.insert(tx, key, value)?;
            tx.relink(bucket, record, tree.root())
        })
    }

    /// Remove `key` from `bucket`; `KeyNotFound` if absent
    pub fn delete(&mut self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<()> {
        let (bucket, key) = (bucket.as_ref(), key.as_ref());
        self.guarded(|tx| {
            let record = tx.directory.require(&*tx, bucket)?;
            let mut tree = record.tree();
            if key.is_empty() || !tree.remove(tx, key)? {
                return Err(StoreError::KeyNotFound);
            }
            tx.relink(bucket, record, tree.root())
        })
    }

    /// Point the directory at a bucket's new root
    fn relink(&mut self, bucket: &[u8], record: BucketRecord, root: PageId) -> Result<()> {
        if record.root == root {
            return Ok(());
        }
        let mut dir = self.directory;
        dir.update(self, bucket, BucketRecord { root })?;
        self.directory = dir;
        Ok(())
    }

    /// Run a mutation; storage failures poison the transaction so it can
    /// only be rolled back
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.poisoned {
            return Err(StoreError::TxAborted);
        }
        let result = op(self);
        if let Err(e) = &result {
            if matches!(
                e,
                StoreError::Io(_) | StoreError::Corruption(_) | StoreError::Serialization(_)
            ) {
                warn!(txid = self.txid, error = %e, "write transaction aborted");
                self.poisoned = true;
            }
        }
        result
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Make all changes durable and visible to new readers
    pub fn commit(mut self) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::TxAborted);
        }
        if !self.modified {
            self.finished = true;
            debug!(txid = self.txid, "read-only write transaction, nothing to commit");
            return Ok(());
        }

        let store = self.store;
        let file = &store.file;
        let page_size = file.page_size();
        let sync = store.config.sync_strategy == SyncStrategy::EveryCommit;

        // Step 1: Persist the freelist; the previous run is pending from now on
        let old = file.read_header(self.base.freelist)?;
        self.freelist.free(self.txid, self.base.freelist, old.span())?;

        let ids = self.freelist.free_count() + self.freelist.pending_count();
        let span = pages_for(FreeList::encoded_len(ids), page_size);
        let freelist_page = self.allocate(span);
        let body = self.freelist.encode()?;
        let count = (self.freelist.free_count() + self.freelist.pending_count()) as u32;
        let freelist_image = seal(
            freelist_page,
            PageKind::Freelist,
            count,
            &body,
            page_size,
            span,
        )?;

        // Step 2: Write dirty nodes and the freelist
        for (&id, node) in &self.dirty {
            file.write_run(id, &node.encode(id, page_size)?)?;
        }
        file.write_run(freelist_page, &freelist_image)?;
        file.ensure_pages(self.page_count)?;

        // Step 3: Make the pages durable before anything points at them
        if sync {
            file.sync()?;
        }

        // Step 4: Swap the root by writing the older meta slot
        let meta = Meta {
            txid: self.txid,
            root: self.directory.root(),
            freelist: freelist_page,
            page_count: self.page_count,
            ..self.base
        };
        file.write_run(meta.slot(), &meta.encode(meta.slot())?)?;
        if sync {
            file.sync()?;
        }

        // Step 5: Publish
        *store.free_counts.lock() = (self.freelist.free_count(), self.freelist.pending_count());
        self.state.freelist = std::mem::take(&mut self.freelist);
        *store.meta.write() = meta;
        self.finished = true;

        debug!(
            txid = meta.txid,
            pages_written = self.dirty.len(),
            page_count = meta.page_count,
            "write transaction committed"
        );
        Ok(())
    }

    /// Discard all changes
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(txid = self.txid, "write transaction rolled back");
    }

    fn allocate(&mut self, span: u64) -> PageId {
        match self.freelist.allocate(span) {
            Some(id) => id,
            None => {
                let id = self.page_count;
                self.page_count += span;
                id
            }
        }
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && self.modified {
            warn!(txid = self.txid, "uncommitted write transaction dropped, rolled back");
        }
    }
}

impl NodeSource for WriteTxn<'_> {
    fn load(&self, id: PageId) -> Result<Arc<Node>> {
        if let Some(node) = self.dirty.get(&id) {
            return Ok(Arc::clone(node));
        }
        if id < META_PAGE_COUNT || id >= self.base.page_count {
            return Err(StoreError::corruption(format!(
                "page {} outside committed range 2..{}",
                id, self.base.page_count
            )));
        }
        if self.freelist.is_free(id) {
            return Err(StoreError::corruption(format!("read of freed page {}", id)));
        }
        let (header, buf) = self.store.file.read_run(id)?;
        Ok(Arc::new(Node::decode(&header, &buf)?))
    }

    fn page_size(&self) -> usize {
        self.store.file.page_size()
    }
}

impl NodeSink for WriteTxn<'_> {
    fn store(&mut self, node: Node) -> Result<PageId> {
        let id = self.allocate(node.span(self.page_size()));
        self.dirty.insert(id, Arc::new(node));
        self.modified = true;
        Ok(id)
    }

    fn discard(&mut self, id: PageId) -> Result<()> {
        self.modified = true;
        if let Some(node) = self.dirty.remove(&id) {
            // Never visible to any snapshot: reusable right away
            let span = node.span(self.page_size());
            return self.freelist.free_now(id, span);
        }
        if id < META_PAGE_COUNT || id >= self.base.page_count {
            return Err(StoreError::corruption(format!("free of out-of-range page {}", id)));
        }
        let header = self.store.file.read_header(id)?;
        self.freelist.free(self.txid, id, header.span())
    }
}

impl BucketReader for WriteTxn<'_> {
    fn directory(&self) -> Directory {
        self.directory
    }
}
