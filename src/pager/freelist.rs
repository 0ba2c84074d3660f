//! Free page tracking
//!
//! Pages released by a committed transaction stay *pending* under that
//! transaction's id until no open snapshot can still reach them.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, StoreError};

use super::{PageId, TxId};

/// Free and pending pages of the store
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    /// Pages available for allocation
    free: BTreeSet<PageId>,
    /// Pages freed by a transaction, keyed by that transaction's id
    pending: BTreeMap<TxId, Vec<PageId>>,
}

impl FreeList {
    /// Create an empty freelist
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a freelist where every given page is immediately reusable
    pub fn from_ids(ids: impl IntoIterator<Item = PageId>) -> Self {
        Self {
            free: ids.into_iter().collect(),
            pending: BTreeMap::new(),
        }
    }

    /// Take `span` contiguous free pages, lowest run first
    pub fn allocate(&mut self, span: u64) -> Option<PageId> {
        if span == 0 {
            return None;
        }
        if span == 1 {
            return self.free.pop_first();
        }

        let mut run_start = None;
        let mut run_len = 0u64;
        let mut prev = None;
        for &id in &self.free {
            match prev {
                Some(p) if p + 1 == id => run_len += 1,
                _ => {
                    run_start = Some(id);
                    run_len = 1;
                }
            }
            prev = Some(id);
            if run_len == span {
                break;
            }
        }

        if run_len < span {
            return None;
        }
        let start = run_start?;
        for id in start..start + span {
            self.free.remove(&id);
        }
        Some(start)
    }

    /// Release a run freed by transaction `txid`; reusable after `release`
    pub fn free(&mut self, txid: TxId, id: PageId, span: u64) -> Result<()> {
        self.check_not_free(id, span)?;
        self.pending.entry(txid).or_default().extend(id..id + span);
        Ok(())
    }

    /// Return a run that no snapshot has ever seen
    pub fn free_now(&mut self, id: PageId, span: u64) -> Result<()> {
        self.check_not_free(id, span)?;
        self.free.extend(id..id + span);
        Ok(())
    }

    /// Make pages freed by transactions up to and including `upto` reusable
    pub fn release(&mut self, upto: TxId) -> usize {
        let keep = match upto.checked_add(1) {
            Some(bound) => self.pending.split_off(&bound),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, keep);

        let mut count = 0;
        for ids in released.into_values() {
            count += ids.len();
            self.free.extend(ids);
        }
        count
    }

    /// Whether `id` is currently allocatable
    pub fn is_free(&self, id: PageId) -> bool {
        self.free.contains(&id)
    }

    /// Number of allocatable pages
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of pages waiting for older snapshots to close
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Every free or pending page, sorted.
    ///
    /// This is what gets persisted: after a restart no snapshot is open, so
    /// pending pages are free.
    pub fn all_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self
            .free
            .iter()
            .copied()
            .chain(self.pending.values().flatten().copied())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Persisted body size for `count` page ids
    pub fn encoded_len(count: usize) -> usize {
        // bincode Vec<u64>: u64 length prefix + 8 bytes per id
        8 + 8 * count
    }

    /// Encode the persisted form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.all_ids())?)
    }

    /// Decode a persisted freelist; every page becomes allocatable
    pub fn decode(body: &[u8]) -> Result<Self> {
        let ids: Vec<PageId> = bincode::deserialize(body)?;
        Ok(Self::from_ids(ids))
    }

    fn check_not_free(&self, id: PageId, span: u64) -> Result<()> {
        if let Some(dup) = (id..id + span).find(|p| self.free.contains(p)) {
            return Err(StoreError::corruption(format!("double free of page {}", dup)));
        }
        Ok(())
    }
}
