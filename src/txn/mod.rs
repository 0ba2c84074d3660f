//! Transaction Module
//!
//! Single-writer / multi-reader transactions over copy-on-write trees.
//!
//! ## Concurrency Model
//!
//! - **Read transactions** copy the committed meta when they start and read
//!   only pages reachable from it. They take no lock that a writer holds for
//!   longer than one page read, and any number run at once.
//! - **Write transactions** hold the writer mutex from begin to
//!   commit/rollback. They never overwrite a page a snapshot can reach: new
//!   nodes go to free pages or the end of the file, and replaced pages become
//!   pending until every older snapshot is gone.
//!
//! ## Commit Protocol
//! 1. Persist the freelist on fresh pages; the old freelist run becomes pending
//! 2. Write every dirty node
//! 3. fsync
//! 4. Write the new meta into the older meta slot, fsync
//! 5. Publish the meta and freelist to the store
//!
//! Any failure before step 4 leaves the previous meta as the newest valid
//! one, so the transaction has no visible effect.

mod read;
mod registry;
mod write;

pub use read::ReadTxn;
pub use registry::ReaderRegistry;
pub use write::WriteTxn;

use crate::btree::{Cursor, NodeSource, Scan};
use crate::directory::Directory;
use crate::error::{Result, StoreError};
use crate::search::{self, Field};

/// Read operations shared by read and write transactions
///
/// A write transaction sees its own uncommitted changes.
pub trait BucketReader: NodeSource + Sized {
    /// Bucket directory as seen by this transaction
    fn directory(&self) -> Directory;

    /// Whether `bucket` exists
    fn bucket_exists(&self, bucket: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.directory().lookup(self, bucket.as_ref())?.is_some())
    }

    /// Value of `key`, `None` if the key is absent.
    ///
    /// A missing bucket is `BucketNotFound`.
    fn get(&self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let record = self.directory().require(self, bucket.as_ref())?;
        let key = key.as_ref();
        if key.is_empty() {
            return Ok(None);
        }
        record.tree().get(self, key)
    }

    /// Value of `key`, empty if the key or the bucket is missing
    fn read(&self, bucket: impl AsRef<[u8]>, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        match self.get(bucket, key) {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(StoreError::BucketNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// All bucket names in order
    fn bucket_names(&self) -> Result<Vec<Vec<u8>>> {
        self.directory().names(self)
    }

    /// Lazy ordered scan of one bucket
    fn scan(&self, bucket: impl AsRef<[u8]>, scan: Scan) -> Result<Cursor<'_>> {
        let record = self.directory().require(self, bucket.as_ref())?;
        Ok(record.tree().cursor(self, scan))
    }

    /// All keys of a bucket in order
    fn keys(&self, bucket: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        search::project(self.scan(bucket, Scan::all())?, Field::Key)
    }

    /// All values of a bucket, in key order
    fn values(&self, bucket: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        search::project(self.scan(bucket, Scan::all())?, Field::Value)
    }

    /// Bucket names containing `needle`
    fn find_buckets(&self, needle: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        Ok(search::filter_names(self.bucket_names()?, needle.as_ref()))
    }

    /// Keys containing `needle`
    fn find_keys(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        search::select(self.scan(bucket, Scan::all())?, Field::Key, needle.as_ref(), Field::Key)
    }

    /// Values containing `needle`
    fn find_values(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        search::select(self.scan(bucket, Scan::all())?, Field::Value, needle.as_ref(), Field::Value)
    }

    /// Keys whose value contains `needle`
    fn keys_by_value(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        search::select(self.scan(bucket, Scan::all())?, Field::Value, needle.as_ref(), Field::Key)
    }

    /// Values whose key contains `needle`
    fn values_by_key(
        &self,
        bucket: impl AsRef<[u8]>,
        needle: impl AsRef<[u8]>,
    ) -> Result<Vec<Vec<u8>>> {
        search::select(self.scan(bucket, Scan::all())?, Field::Key, needle.as_ref(), Field::Value)
    }
}
