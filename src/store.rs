//! Store Module
//!
//! The public handle that ties the page file, transactions and buckets
//! together.
//!
//! ## Responsibilities
//! - Create or open the backing file and pick the newest valid meta
//! - Hand out read and write transactions
//! - Run each convenience operation in exactly one transaction

use std::io::Write;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backup;
use crate::btree::{Node, Scan};
use crate::config::{Config, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::directory::bucket_label;
use crate::error::{Result, StoreError};
use crate::pager::{seal, FreeList, Meta, PageFile, PageKind, TxId, PAGE_HEADER_SIZE};
use crate::txn::{BucketReader, ReadTxn, ReaderRegistry, WriteTxn};

/// Bytes read from each meta slot before the page size is known
const META_PROBE_SIZE: usize = 512;

/// State owned by whoever holds the writer lock
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    /// Committed freelist, including pages pending on open snapshots
    pub(crate) freelist: FreeList,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Id of the last committed transaction
    pub txid: TxId,
    /// Page size recorded in the file
    pub page_size: usize,
    /// Pages in use or free, meta pages included
    pub page_count: u64,
    /// Pages ready for reuse
    pub free_pages: usize,
    /// Freed pages still reachable from an open snapshot
    pub pending_pages: usize,
    /// Buckets in the committed directory
    pub buckets: usize,
    /// Read transactions open besides the one taken for these counters
    pub open_readers: usize,
}

/// An open store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** hold `writer` for the whole transaction; at most one runs.
/// - **Reads** copy `meta` once and never wait on the writer.
/// - `readers` records open snapshots so the writer does not reuse pages
///   they can still reach.
///
/// `Store` is `Send + Sync`; share it behind an `Arc`.
pub struct Store {
    pub(crate) config: Config,
    pub(crate) file: PageFile,
    /// Last committed meta
    pub(crate) meta: RwLock<Meta>,
    pub(crate) writer: Mutex<WriterState>,
    pub(crate) readers: Mutex<ReaderRegistry>,
    /// Free and pending page counts as of the last commit
    pub(crate) free_counts: Mutex<(usize, usize)>,
}

impl Store {
    /// Open or create a store at `path` with default settings
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(Config::builder().path(path.as_ref()).build())
    }

    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Lock the file (exclusive, or shared when read-only)
    /// 2. Initialize an empty file
    /// 3. Pick the newest valid meta page
    /// 4. Load the freelist it points at
    pub fn open_with(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Open and lock
        let mut file = PageFile::open(&config.path, config.page_size, config.read_only)?;

        // Step 2: Initialize
        if file.is_empty()? {
            if config.read_only {
                return Err(StoreError::Config(format!(
                    "cannot initialize {} in read-only mode",
                    config.path.display()
                )));
            }
            Self::initialize(&file)?;
        }

        // Step 3: Meta
        let meta = Self::load_meta(&file, config.page_size)?;
        file.set_page_size(meta.page_size as usize);

        // Step 4: Freelist
        let (header, buf) = file.read_run(meta.freelist)?;
        if header.kind != PageKind::Freelist {
            return Err(StoreError::corruption(format!(
                "page {} is {:?}, expected freelist",
                meta.freelist, header.kind
            )));
        }
        let freelist = FreeList::decode(&buf[PAGE_HEADER_SIZE..])?;

        info!(
            path = %config.path.display(),
            txid = meta.txid,
            page_size = meta.page_size,
            page_count = meta.page_count,
            free_pages = freelist.free_count(),
            read_only = config.read_only,
            "store opened"
        );

        Ok(Self {
            config,
            file,
            meta: RwLock::new(meta),
            free_counts: Mutex::new((freelist.free_count(), freelist.pending_count())),
            writer: Mutex::new(WriterState { freelist }),
            readers: Mutex::new(ReaderRegistry::new()),
        })
    }

    /// Write the two meta pages, an empty freelist and an empty directory
    fn initialize(file: &PageFile) -> Result<()> {
        let page_size = file.page_size();
        let first = Meta::initial(page_size);
        let second = Meta { txid: first.txid + 1, ..first };

        let freelist = FreeList::new();
        let body = freelist.encode()?;
        let freelist_image = seal(first.freelist, PageKind::Freelist, 0, &body, page_size, 1)?;
        file.write_run(first.freelist, &freelist_image)?;
        file.write_run(first.root, &Node::empty_leaf().encode(first.root, page_size)?)?;
        file.write_run(first.slot(), &first.encode(first.slot())?)?;
        file.write_run(second.slot(), &second.encode(second.slot())?)?;
        file.sync()?;

        debug!(path = %file.path().display(), page_size, "initialized empty store file");
        Ok(())
    }

    /// Newest meta whose checksum and fields are valid
    fn load_meta(file: &PageFile, configured_page_size: usize) -> Result<Meta> {
        let first = Self::probe_meta(file, 0);

        // Slot 1 sits one page in; trust slot 0's page size when it is readable
        let second = match &first {
            Ok(meta) => Self::probe_meta(file, meta.page_size as u64),
            Err(_) => Self::probe_second_meta(file, configured_page_size),
        };

        match (first, second) {
            (Ok(a), Ok(b)) => Ok(if b.txid > a.txid { b } else { a }),
            (Ok(meta), Err(e)) | (Err(e), Ok(meta)) => {
                warn!(error = %e, txid = meta.txid, "one meta page is invalid, using the other");
                Ok(meta)
            }
            (Err(a), Err(b)) => Err(StoreError::corruption(format!(
                "no valid meta page ({}; {})",
                a, b
            ))),
        }
    }

    /// Find slot 1 without slot 0's page size: try the configured size first,
    /// then every other allowed one
    fn probe_second_meta(file: &PageFile, configured_page_size: usize) -> Result<Meta> {
        let candidates = std::iter::once(configured_page_size).chain(
            std::iter::successors(Some(MIN_PAGE_SIZE), |size| Some(size * 2))
                .take_while(|&size| size <= MAX_PAGE_SIZE)
                .filter(|&size| size != configured_page_size),
        );

        let mut last_err = None;
        for page_size in candidates {
            match Self::probe_meta(file, page_size as u64) {
                Ok(meta) if meta.page_size as usize == page_size => return Ok(meta),
                Ok(meta) => {
                    last_err = Some(StoreError::corruption(format!(
                        "meta at offset {} records page size {}",
                        page_size, meta.page_size
                    )))
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::corruption("no meta page in slot 1")))
    }

    fn probe_meta(file: &PageFile, offset: u64) -> Result<Meta> {
        let mut buf = vec![0u8; META_PROBE_SIZE];
        file.read_at(offset, &mut buf)?;
        Meta::decode(&buf)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a read transaction on the last committed snapshot
    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn::begin(self)
    }

    /// Start the write transaction, waiting for any active writer
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        WriteTxn::begin(self)
    }

    /// Run `f` in a read transaction
    pub fn view<T>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let txn = self.begin_read();
        f(&txn)
    }

    /// Run `f` in a write transaction; commit on `Ok`, roll back on `Err`
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    // =========================================================================
    // Buckets
    // =========================================================================

    /// Create an empty bucket
    pub fn create_bucket(&self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = name.as_ref();
        self.update(|tx| tx.create_bucket(name))?;
        info!(bucket = %bucket_label(name), "bucket created");
        Ok(())
    }

    /// Delete a bucket and every entry in it
    pub fn delete_bucket(&self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = name.as_ref();
        self.update(|tx| tx.delete_bucket(name))?;
        info!(bucket = %bucket_label(name), "bucket deleted");
        Ok(())
    }

    /// All bucket names in order
    pub fn all_buckets(&self) -> Result<Vec<Vec<u8>>> {
        self.begin_read().bucket_names()
    }

    /// Bucket names containing `needle`
    pub fn find_buckets(&self, needle: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        self.begin_read().find_buckets(needle)
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Insert or overwrite a key
    pub fn write(
        &self,
        bucket: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        self.update(|tx| tx.put(bucket, key, value))
    }

    /// Value of a key; empty when the key or the bucket is missing
    pub fn read(&self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.begin_read().read(bucket, key)
    }

    /// Value of a key, `None` when absent; a missing bucket is an error
    pub fn get(&self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.begin_read().get(bucket, key)
    }

    /// Remove a key
    pub fn delete(&self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<()> {
        self.update(|tx| tx.delete(bucket, key))
    }

    /// Entries of a bucket matched by `scan`, in key order
    pub fn scan(&self, bucket: impl AsRef<[u8]>, scan: Scan) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.begin_read();
        let entries = txn.scan(bucket, scan)?.collect();
        entries
    }

    // =========================================================================
    // Search
    // =========================================================================

    pub fn all_keys(&self, bucket: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        self.begin_read().keys(bucket)
    }

    pub fn all_values(&self, bucket: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        self.begin_read().values(bucket)
    }

    /// Keys containing `needle`
    pub fn find_keys(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        self.begin_read().find_keys(bucket, needle)
    }

    /// Values containing `needle`
    pub fn find_values(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        self.begin_read().find_values(bucket, needle)
    }

    /// Keys whose value contains `needle`
    pub fn keys_by_value(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        self.begin_read().keys_by_value(bucket, needle)
    }

    /// Values whose key contains `needle`
    pub fn values_by_key(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        self.begin_read().values_by_key(bucket, needle)
    }

    // =========================================================================
    // Backup
    // =========================================================================

    /// Copy the current snapshot to a new store file at `path`
    pub fn backup(&self, path: impl AsRef<Path>) -> Result<u64> {
        backup::backup_to_path(&self.begin_read(), path.as_ref())
    }

    /// Stream the current snapshot as a complete store file
    pub fn backup_to<W: Write>(&self, out: &mut W) -> Result<u64> {
        backup::backup_to(&self.begin_read(), out)
    }

    // =========================================================================
    // Lifecycle & Accessors
    // =========================================================================

    /// Current counters
    pub fn stats(&self) -> Result<Stats> {
        let txn = self.begin_read();
        let buckets = txn.bucket_names()?.len();
        let (free_pages, pending_pages) = *self.free_counts.lock();
        // This snapshot is one of them
        let open_readers = self.readers.lock().count().saturating_sub(1);
        let meta = *txn.meta();
        drop(txn);

        Ok(Stats {
            txid: meta.txid,
            page_size: self.file.page_size(),
            page_count: meta.page_count,
            free_pages,
            pending_pages,
            buckets,
            open_readers,
        })
    }

    /// Flush and release the file
    pub fn close(self) -> Result<()> {
        if !self.config.read_only {
            self.file.sync()?;
        }
        info!(path = %self.config.path.display(), txid = self.meta.read().txid, "store closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.config.path)
            .field("meta", &*self.meta.read())
            .finish()
    }
}
