//! Read-only transactions.

use std::sync::Arc;

use tracing::debug;

use crate::btree::{Node, NodeSource};
use crate::directory::Directory;
use crate::error::{Result, StoreError};
use crate::pager::{Meta, PageId, TxId, META_PAGE_COUNT};
use crate::store::Store;

use super::BucketReader;

/// A consistent, read-only view of the store as of its start
///
/// Registers its snapshot with the store while open so that pages it can
/// reach are not reused; dropping it releases the snapshot.
pub struct ReadTxn<'s> {
    store: &'s Store,
    meta: Meta,
}

impl<'s> ReadTxn<'s> {
    pub(crate) fn begin(store: &'s Store) -> Self {
        // Register under the registry lock so a writer computing the oldest
        // snapshot either sees this reader or committed nothing newer yet
        let meta = {
            let mut readers = store.readers.lock();
            let meta = *store.meta.read();
            readers.register(meta.txid);
            meta
        };
        debug!(txid = meta.txid, "read transaction started");
        Self { store, meta }
    }

    /// Id of the last transaction visible to this snapshot
    pub fn txid(&self) -> TxId {
        self.meta.txid
    }

    pub(crate) fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn store(&self) -> &'s Store {
        self.store
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.store.readers.lock().unregister(self.meta.txid);
        debug!(txid = self.meta.txid, "read transaction closed");
    }
}

impl NodeSource for ReadTxn<'_> {
    fn load(&self, id: PageId) -> Result<Arc<Node>> {
        if id < META_PAGE_COUNT || id >= self.meta.page_count {
            return Err(StoreError::corruption(format!(
                "page {} outside snapshot range 2..{}",
                id, self.meta.page_count
            )));
        }
        let (header, buf) = self.store.file.read_run(id)?;
        Ok(Arc::new(Node::decode(&header, &buf)?))
    }

    fn page_size(&self) -> usize {
        self.meta.page_size as usize
    }
}

impl BucketReader for ReadTxn<'_> {
    fn directory(&self) -> Directory {
        Directory::open(self.meta.root)
    }
}
