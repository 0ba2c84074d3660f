//! Open snapshot tracking
//!
//! The writer consults this before reusing freed pages: a page freed by
//! transaction `T` may still be reachable from any snapshot older than `T`.

use std::collections::BTreeMap;

use crate::pager::TxId;

/// Snapshot txids of open read transactions, with multiplicity
#[derive(Debug, Default)]
pub struct ReaderRegistry {
    open: BTreeMap<TxId, usize>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, txid: TxId) {
        *self.open.entry(txid).or_insert(0) += 1;
    }

    pub fn unregister(&mut self, txid: TxId) {
        if let Some(count) = self.open.get_mut(&txid) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&txid);
            }
        }
    }

    /// Oldest snapshot still open
    pub fn oldest(&self) -> Option<TxId> {
        self.open.keys().next().copied()
    }

    /// Number of open read transactions
    pub fn count(&self) -> usize {
        self.open.values().sum()
    }
}
