//! # bucketkv
//!
//! An embedded, single-file key-value store with:
//! - Named buckets, each an ordered map of byte keys to byte values
//! - Copy-on-write B-trees with an atomically swapped root (no WAL)
//! - Single-writer/multi-reader transactions with snapshot isolation
//! - Online backup from a consistent snapshot
//! - Substring search over bucket names, keys and values
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │          (bucket CRUD, search, backup, stats)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Transactions                              │
//! │      (one WriteTxn at a time, any number of ReadTxns)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Directory  │─────────▶│   B-trees   │
//!   │ (name→root) │          │  (per bucket)│
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │    Pager    │
//!                           │ (meta, free)│
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use bucketkv::Store;
//!
//! # fn main() -> bucketkv::Result<()> {
//! let store = Store::open("data.db")?;
//! store.create_bucket("users")?;
//! store.write("users", "alice", "30")?;
//! assert_eq!(store.read("users", "alice")?, b"30");
//! store.close()
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod pager;
pub mod btree;
pub mod directory;
pub mod txn;
pub mod search;
pub mod backup;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, SyncStrategy};
pub use btree::{Cursor, Scan};
pub use txn::{BucketReader, ReadTxn, WriteTxn};
pub use store::{Stats, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of bucketkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
