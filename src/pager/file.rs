//! Page File
//!
//! Positioned page I/O over the locked backing file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Result, StoreError};

use super::page::PageHeader;
use super::{PageId, PAGE_HEADER_SIZE};

/// The backing file, addressed in pages
///
/// ## Concurrency:
/// - All transfers are positional (pread/pwrite), so the handle is shared
///   without a lock and readers never wait on the writer's I/O or fsync.
/// - Cross-process exclusion is an advisory lock taken on open (exclusive
///   for read-write, shared for read-only) and dropped with the handle.
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_size: usize,
}

impl PageFile {
    /// Open or create the file and take the process-level lock
    pub fn open(path: &Path, page_size: usize, read_only: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };

        // Fully qualified: newer std has inherent File lock methods of the same name
        let locked = if read_only {
            FileExt::try_lock_shared(&file)
        } else {
            FileExt::try_lock_exclusive(&file)
        };
        if let Err(e) = locked {
            let kind = e.kind();
            if kind == fs2::lock_contended_error().kind() || kind == io::ErrorKind::WouldBlock {
                return Err(StoreError::Locked(path.to_path_buf()));
            }
            return Err(e.into());
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    /// Switch to the page size recorded in an existing file's meta
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size;
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Raw Access
    // =========================================================================

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at(&self.file, buf, offset).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                StoreError::corruption(format!(
                    "read of {} bytes at offset {} past end of file",
                    buf.len(),
                    offset
                ))
            } else {
                StoreError::Io(e)
            }
        })
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        write_all_at(&self.file, buf, offset)?;
        Ok(())
    }

    // =========================================================================
    // Page Access
    // =========================================================================

    /// Read and verify the page run starting at `id`
    pub fn read_run(&self, id: PageId) -> Result<(PageHeader, Vec<u8>)> {
        let mut buf = vec![0u8; self.page_size];
        self.read_at(self.offset(id), &mut buf)?;

        let header = PageHeader::read_from(&buf)?;
        if header.overflow > 0 {
            let total = header.span() as usize * self.page_size;
            buf.resize(total, 0);
            self.read_at(self.offset(id + 1), &mut buf[self.page_size..])?;
        }

        let header = PageHeader::verify(&buf, id, self.page_size)?;
        Ok((header, buf))
    }

    /// Read only the header of the page run starting at `id`
    pub fn read_header(&self, id: PageId) -> Result<PageHeader> {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        self.read_at(self.offset(id), &mut buf)?;
        let header = PageHeader::read_from(&buf)?;
        if header.id != id {
            return Err(StoreError::corruption(format!(
                "page {} carries id {}",
                id, header.id
            )));
        }
        Ok(header)
    }

    /// Write a sealed page image at page `id`
    pub fn write_run(&self, id: PageId, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len() % self.page_size, 0);
        self.write_at(self.offset(id), image)
    }

    /// Grow the file so pages `0..page_count` exist
    pub fn ensure_pages(&self, page_count: u64) -> Result<()> {
        let want = page_count * self.page_size as u64;
        if self.file.metadata()?.len() < want {
            self.file.set_len(want)?;
        }
        Ok(())
    }

    /// Flush data and metadata to durable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn offset(&self, id: PageId) -> u64 {
        id * self.page_size as u64
    }
}

// =============================================================================
// Positional I/O
// =============================================================================

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt as _;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt as _;

    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
