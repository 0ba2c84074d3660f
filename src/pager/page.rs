//! Page header encoding and page images.

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::{PageId, PAGE_HEADER_SIZE};

/// What a page holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Meta = 1,
    Freelist = 2,
    Leaf = 3,
    Branch = 4,
}

impl PageKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(PageKind::Meta),
            2 => Ok(PageKind::Freelist),
            3 => Ok(PageKind::Leaf),
            4 => Ok(PageKind::Branch),
            other => Err(StoreError::corruption(format!("unknown page kind {}", other))),
        }
    }
}

/// Fixed header at the start of every page run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub id: PageId,
    pub kind: PageKind,
    pub count: u32,
    pub overflow: u32,
    pub checksum: u32,
}

impl PageHeader {
    /// Number of pages occupied by this run
    pub fn span(&self) -> u64 {
        1 + self.overflow as u64
    }

    /// Write the header into the first `PAGE_HEADER_SIZE` bytes of `buf`
    pub fn write_to(&self, buf: &mut [u8]) {
        let mut out = &mut buf[..PAGE_HEADER_SIZE];
        out.put_u64_le(self.id);
        out.put_u8(self.kind as u8);
        out.put_bytes(0, 3);
        out.put_u32_le(self.count);
        out.put_u32_le(self.overflow);
        out.put_u32_le(self.checksum);
    }

    /// Parse a header without verifying the body checksum
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(StoreError::corruption("truncated page header"));
        }
        let mut input = &buf[..PAGE_HEADER_SIZE];
        let id = input.get_u64_le();
        let kind = PageKind::from_u8(input.get_u8())?;
        input.advance(3);
        let count = input.get_u32_le();
        let overflow = input.get_u32_le();
        let checksum = input.get_u32_le();
        Ok(Self {
            id,
            kind,
            count,
            overflow,
            checksum,
        })
    }

    /// Parse the header of a full page run and verify identity and checksum
    pub fn verify(buf: &[u8], expected: PageId, page_size: usize) -> Result<Self> {
        let header = Self::read_from(buf)?;
        if header.id != expected {
            return Err(StoreError::corruption(format!(
                "page {} carries id {}",
                expected, header.id
            )));
        }
        let len = header.span() as usize * page_size;
        if buf.len() < len {
            return Err(StoreError::corruption(format!(
                "page {} truncated: {} of {} bytes",
                expected,
                buf.len(),
                len
            )));
        }
        let actual = crc32fast::hash(&buf[PAGE_HEADER_SIZE..len]);
        if actual != header.checksum {
            return Err(StoreError::corruption(format!(
                "checksum mismatch on page {}: stored {:#010x}, computed {:#010x}",
                expected, header.checksum, actual
            )));
        }
        Ok(header)
    }
}

/// Number of pages needed for a body of `body_len` bytes
pub fn pages_for(body_len: usize, page_size: usize) -> u64 {
    let total = PAGE_HEADER_SIZE + body_len;
    total.div_ceil(page_size).max(1) as u64
}

/// Build a page image: header followed by `body`, zero padded to whole pages.
///
/// The image spans at least `min_span` pages so a run allocated ahead of
/// encoding is written in full.
pub fn seal(
    id: PageId,
    kind: PageKind,
    count: u32,
    body: &[u8],
    page_size: usize,
    min_span: u64,
) -> Result<Vec<u8>> {
    let span = pages_for(body.len(), page_size).max(min_span);
    let overflow = u32::try_from(span - 1)
        .map_err(|_| StoreError::corruption(format!("page run of {} pages", span)))?;

    let mut buf = vec![0u8; span as usize * page_size];
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + body.len()].copy_from_slice(body);

    let header = PageHeader {
        id,
        kind,
        count,
        overflow,
        checksum: crc32fast::hash(&buf[PAGE_HEADER_SIZE..]),
    };
    header.write_to(&mut buf);
    Ok(buf)
}
