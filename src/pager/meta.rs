//! Meta page (superblock)
//!
//! Two copies live in pages 0 and 1. A commit overwrites the slot of the
//! older copy, so the newest valid meta always names a complete tree.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

use super::page::{seal, PageHeader, PageKind};
use super::{PageId, TxId, FORMAT_VERSION, MAGIC, META_PAGE_COUNT, PAGE_HEADER_SIZE};

/// Committed store state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    /// Id of the transaction that wrote this meta
    pub txid: TxId,
    /// Root page of the bucket directory
    pub root: PageId,
    /// First page of the persisted freelist
    pub freelist: PageId,
    /// High-water mark: pages `0..page_count` exist in the file
    pub page_count: u64,
}

impl Meta {
    /// Meta of a freshly initialized file: freelist at page 2, empty
    /// directory leaf at page 3.
    pub fn initial(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size: page_size as u32,
            txid: 0,
            root: META_PAGE_COUNT + 1,
            freelist: META_PAGE_COUNT,
            page_count: META_PAGE_COUNT + 2,
        }
    }

    /// Meta slot this transaction id commits into
    pub fn slot(&self) -> PageId {
        self.txid % META_PAGE_COUNT
    }

    /// Encode into the page image for `slot`
    pub fn encode(&self, slot: PageId) -> Result<Vec<u8>> {
        let mut body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        seal(slot, PageKind::Meta, 0, &body, self.page_size as usize, 1)
    }

    /// Decode from a buffer holding at least the start of a meta page.
    ///
    /// Only the meta's own checksum is checked, so a short probe read is
    /// enough before the page size is known.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = PageHeader::read_from(buf)?;
        if header.kind != PageKind::Meta {
            return Err(StoreError::corruption(format!(
                "page {} is {:?}, expected meta",
                header.id, header.kind
            )));
        }

        let body = &buf[PAGE_HEADER_SIZE..];
        let meta: Meta = bincode::deserialize(body)?;
        let len = bincode::serialized_size(&meta)? as usize;
        let stored = body
            .get(len..len + 4)
            .ok_or_else(|| StoreError::corruption("truncated meta checksum"))?;
        let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        if crc32fast::hash(&body[..len]) != stored {
            return Err(StoreError::corruption(format!(
                "meta page {} checksum mismatch",
                header.id
            )));
        }

        meta.validate()?;
        Ok(meta)
    }

    /// Check magic, version and page size
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StoreError::corruption(format!(
                "invalid magic {:#010x}",
                self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(StoreError::corruption(format!(
                "unsupported format version {}",
                self.version
            )));
        }
        if !self.page_size.is_power_of_two() || (self.page_size as usize) < 2 * PAGE_HEADER_SIZE {
            return Err(StoreError::corruption(format!(
                "invalid page size {}",
                self.page_size
            )));
        }
        if self.root < META_PAGE_COUNT
            || self.freelist < META_PAGE_COUNT
            || self.root >= self.page_count
            || self.freelist >= self.page_count
        {
            return Err(StoreError::corruption(format!(
                "meta references pages outside 2..{}",
                self.page_count
            )));
        }
        Ok(())
    }
}
