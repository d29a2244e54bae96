//! Thread-safe handle to a block cache
//!
//! [`BlockCache`] itself is single-threaded. [`SharedBlockCache`] puts it
//! behind one lock so several threads can use the same cache; each call is
//! applied atomically with respect to the others.

use crate::cache::BlockCache;
use crate::device::BackingStore;
use crate::stats::StatsSnapshot;
use blockcache_common::{CacheConfig, HandleId, Result};
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

/// Cloneable, lock-protected [`BlockCache`]
#[derive(Clone)]
pub struct SharedBlockCache {
    inner: Arc<Mutex<BlockCache>>,
}

impl SharedBlockCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        Ok(Self::from_cache(BlockCache::new(config)?))
    }

    pub fn with_store(config: CacheConfig, store: impl BackingStore + 'static) -> Result<Self> {
        Ok(Self::from_cache(BlockCache::with_store(config, store)?))
    }

    pub fn from_cache(cache: BlockCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<HandleId> {
        self.inner.lock().open(path)
    }

    pub fn close(&self, handle: HandleId) -> Result<()> {
        self.inner.lock().close(handle)
    }

    pub fn read(&self, handle: HandleId, buf: &mut [u8]) -> Result<usize> {
        self.inner.lock().read(handle, buf)
    }

    pub fn write(&self, handle: HandleId, buf: &[u8]) -> Result<usize> {
        self.inner.lock().write(handle, buf)
    }

    pub fn seek(&self, handle: HandleId, pos: SeekFrom) -> Result<u64> {
        self.inner.lock().seek(handle, pos)
    }

    pub fn fsync(&self, handle: HandleId) -> Result<()> {
        self.inner.lock().fsync(handle)
    }

    /// Seek then read under one lock acquisition
    pub fn read_at(&self, handle: HandleId, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut cache = self.inner.lock();
        cache.seek(handle, SeekFrom::Start(offset))?;
        cache.read(handle, buf)
    }

    /// Seek then write under one lock acquisition
    pub fn write_at(&self, handle: HandleId, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut cache = self.inner.lock();
        cache.seek(handle, SeekFrom::Start(offset))?;
        cache.write(handle, buf)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.lock().stats().snapshot()
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Run `f` with exclusive access to the cache
    pub fn with<R>(&self, f: impl FnOnce(&mut BlockCache) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
