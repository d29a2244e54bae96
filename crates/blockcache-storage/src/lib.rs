//! blockcache storage engine
//!
//! This crate implements a user-space page cache for files opened with
//! direct I/O, including:
//! - Raw file access (O_DIRECT / F_NOCACHE) with aligned buffers
//! - A backing-store abstraction for whole-block transfers
//! - Resident pages indexed per file, evicted in FIFO order
//! - Handles with independent cursors over shared pages
//! - Deferred write-back on eviction, fsync and close

pub mod cache;
pub mod device;
pub mod handle;
pub mod page;
pub mod raw_io;
pub mod shared;
pub mod stats;

// Re-exports
pub use cache::BlockCache;
pub use device::{BackingFile, BackingStore, DirectStore, load_block, store_block};
pub use handle::{Handle, HandleRegistry};
pub use page::{InodeIndex, Page, PageId, PageStore};
pub use raw_io::{AlignedBuffer, RawFile, check_alignment};
pub use shared::SharedBlockCache;
pub use stats::{CacheStats, StatsSnapshot};
