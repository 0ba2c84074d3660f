//! Backup Engine
//!
//! Streams one snapshot out as a complete store file. The snapshot's read
//! transaction stays open for the whole copy, so no page it reaches is
//! reused underneath it and writers keep committing meanwhile.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::{Result, StoreError};
use crate::pager::META_PAGE_COUNT;
use crate::txn::ReadTxn;

/// Pages copied per read
const COPY_CHUNK_PAGES: u64 = 64;

/// Write the snapshot of `txn` to `out`; returns bytes written
pub fn backup_to<W: Write>(txn: &ReadTxn<'_>, out: &mut W) -> Result<u64> {
    let meta = *txn.meta();
    let file = &txn.store().file;
    let page_size = meta.page_size as u64;
    let mut written = 0u64;

    // Both slots carry the snapshot meta
    for slot in 0..META_PAGE_COUNT {
        let image = meta.encode(slot)?;
        out.write_all(&image)?;
        written += image.len() as u64;
    }

    let mut buf = Vec::new();
    let mut page = META_PAGE_COUNT;
    while page < meta.page_count {
        let pages = COPY_CHUNK_PAGES.min(meta.page_count - page);
        buf.resize((pages * page_size) as usize, 0);
        file.read_at(page * page_size, &mut buf)?;
        out.write_all(&buf)?;
        written += buf.len() as u64;
        page += pages;
    }

    out.flush()?;
    Ok(written)
}

/// Write the snapshot of `txn` to a new file at `path`
pub fn backup_to_path(txn: &ReadTxn<'_>, path: &Path) -> Result<u64> {
    let source = txn.store().path();
    if let (Ok(a), Ok(b)) = (path.canonicalize(), source.canonicalize()) {
        if a == b {
            return Err(StoreError::InvalidArgument(format!(
                "backup destination {} is the store itself",
                path.display()
            )));
        }
    }

    let mut out = BufWriter::new(File::create(path)?);
    let written = backup_to(txn, &mut out)?;
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    info!(
        destination = %path.display(),
        txid = txn.txid(),
        bytes = written,
        "backup complete"
    );
    Ok(written)
}
