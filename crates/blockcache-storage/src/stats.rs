//! Cache statistics for monitoring

use std::sync::atomic::{AtomicU64, Ordering};

/// Event counters of a block cache
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Sub-accesses served from a resident page
    pub hits: AtomicU64,
    /// Sub-accesses that had to load a block
    pub misses: AtomicU64,
    /// Pages removed to make room
    pub evictions: AtomicU64,
    /// Dirty pages written back (eviction or fsync)
    pub writebacks: AtomicU64,
    /// Write-backs that failed and left the page dirty
    pub writeback_failures: AtomicU64,
    /// Block reads issued to backing files
    pub backing_reads: AtomicU64,
    /// Block writes issued to backing files
    pub backing_writes: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.writebacks.store(0, Ordering::Relaxed);
        self.writeback_failures.store(0, Ordering::Relaxed);
        self.backing_reads.store(0, Ordering::Relaxed);
        self.backing_writes.store(0, Ordering::Relaxed);
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
            writeback_failures: self.writeback_failures.load(Ordering::Relaxed),
            backing_reads: self.backing_reads.load(Ordering::Relaxed),
            backing_writes: self.backing_writes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub writeback_failures: u64,
    pub backing_reads: u64,
    pub backing_writes: u64,
}
