//! Page Storage Module
//!
//! Manages the single backing file as a sequence of fixed-size pages.
//!
//! ## Responsibilities
//! - Positioned page reads/writes with checksums
//! - Two alternating meta pages (superblock) holding the committed root
//! - Free page tracking with deferred reclamation for open snapshots
//! - Advisory file locking (one writer process per file)
//!
//! ## File Format
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────────┐
//! │ Page 0: Meta │ Page 1: Meta │ Page 2.. : freelist / leaf / branch  │
//! └──────────────┴──────────────┴──────────────────────────────────────┘
//!
//! Every page (or run of pages for an oversized node):
//! ┌─────────┬──────────┬──────────────┬───────────┬──────────────┬─────────┬──────┐
//! │ Id (8)  │ Kind (1) │ Reserved (3) │ Count (4) │ Overflow (4) │ CRC (4) │ Body │
//! └─────────┴──────────┴──────────────┴───────────┴──────────────┴─────────┴──────┘
//! ```
//!
//! A node that does not fit in one page occupies `1 + overflow` contiguous
//! pages; the CRC covers the whole body of the run.

mod file;
mod freelist;
mod meta;
mod page;

pub use file::PageFile;
pub use freelist::FreeList;
pub use meta::Meta;
pub use page::{pages_for, seal, PageHeader, PageKind};

// =============================================================================
// Shared Types and Constants
// =============================================================================

/// Page number within the backing file
pub type PageId = u64;

/// Transaction id; the committed meta carries the id of the last writer
pub type TxId = u64;

/// Magic number identifying a bucketkv file ("BKV1")
pub const MAGIC: u32 = 0x424B_5631;

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Page header size: Id (8) + Kind (1) + Reserved (3) + Count (4) + Overflow (4) + CRC (4)
pub const PAGE_HEADER_SIZE: usize = 24;

/// Number of meta pages at the start of the file
pub const META_PAGE_COUNT: u64 = 2;
