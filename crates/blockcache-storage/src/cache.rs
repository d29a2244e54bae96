//! Block cache over direct-I/O backing files
//!
//! Since backing files are opened with O_DIRECT/F_NOCACHE, every transfer
//! must be a whole aligned block. [`BlockCache`] turns byte-granular
//! reads and writes into block transfers: accesses are split on block
//! boundaries, each block is resolved through the per-file index, loaded
//! on a miss and then copied into or out of.
//!
//! Writes are deferred: pages are marked dirty and only written back when
//! they are evicted, or on [`BlockCache::fsync`] / [`BlockCache::close`].
//! Eviction is strict FIFO by insertion order.

use crate::device::{BackingStore, DirectStore, load_block, store_block};
use crate::handle::HandleRegistry;
use crate::page::{Page, PageStore};
use crate::raw_io::AlignedBuffer;
use crate::stats::CacheStats;
use blockcache_common::{CacheConfig, Error, FileIdentity, HandleId, PageKey, Result};
use std::io::{self, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

/// Write-back page cache with FIFO eviction
pub struct BlockCache {
    config: CacheConfig,
    store: Box<dyn BackingStore>,
    pages: PageStore,
    handles: HandleRegistry,
    stats: CacheStats,
}

impl BlockCache {
    /// Create a cache over the local filesystem
    pub fn new(config: CacheConfig) -> Result<Self> {
        let store = DirectStore::new(config.direct_io);
        Self::with_store(config, store)
    }

    /// Create a cache over a custom backing store
    pub fn with_store(config: CacheConfig, store: impl BackingStore + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pages: PageStore::new(config.capacity),
            handles: HandleRegistry::default(),
            stats: CacheStats::default(),
            store: Box::new(store),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Maximum number of resident pages
    pub fn capacity(&self) -> usize {
        self.pages.capacity()
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Number of resident dirty pages across all files
    pub fn dirty_count(&self) -> usize {
        self.pages.dirty_count()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn open_handles(&self) -> Vec<HandleId> {
        self.handles.ids()
    }

    /// Resident page keys, oldest first
    pub fn resident_keys(&self) -> Vec<PageKey> {
        self.pages.keys().collect()
    }

    /// Current cursor of a handle
    pub fn position(&self, handle: HandleId) -> Result<u64> {
        Ok(self.handles.get(handle)?.cursor())
    }

    /// Logical size of the handle's file, including unflushed writes
    pub fn file_size(&self, handle: HandleId) -> Result<u64> {
        let identity = self.handles.get(handle)?.identity();
        Ok(self.pages.index().size(identity))
    }

    /// Whether the block holding `offset` of the handle's file is resident
    pub fn is_resident(&self, handle: HandleId, offset: u64) -> Result<bool> {
        let identity = self.handles.get(handle)?.identity();
        let (block_offset, _) = self.split(offset);
        Ok(self
            .pages
            .lookup(PageKey::new(identity, block_offset))
            .is_some())
    }

    /// Block offsets of the dirty pages of the handle's file
    pub fn dirty_pages(&self, handle: HandleId) -> Result<Vec<u64>> {
        let identity = self.handles.get(handle)?.identity();
        Ok(self
            .pages
            .dirty_pages(identity)
            .into_iter()
            .map(|id| self.pages[id].offset())
            .collect())
    }

    /// Open a backing file and register a handle with its cursor at 0
    ///
    /// Pages cached for the same file by earlier handles are reused.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<HandleId> {
        let path = path.as_ref();
        let file = self.store.open(path)?;
        let identity = file.identity()?;
        let on_disk = file.len()?;

        // Unflushed writes may reach past the on-disk length
        if self.pages.has_dirty(identity) {
            self.pages.index_mut().grow(identity, on_disk);
        } else {
            self.pages.index_mut().set_size(identity, on_disk);
        }

        let handle = self.handles.register(identity, path, file);
        info!(
            %handle,
            %identity,
            path = %path.display(),
            resident = self.pages.index().resident(identity),
            "opened"
        );
        Ok(handle)
    }

    /// Flush the handle's file and close the handle
    ///
    /// Resident pages stay cached for later opens of the same file. If the
    /// flush fails the handle remains open so the close can be retried.
    pub fn close(&mut self, handle: HandleId) -> Result<()> {
        self.fsync(handle)?;
        let closed = self.handles.remove(handle)?;
        info!(%handle, path = %closed.path().display(), "closed");
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the handle's cursor
    ///
    /// Returns fewer bytes only at end of file.
    pub fn read(&mut self, handle: HandleId, buf: &mut [u8]) -> Result<usize> {
        let (identity, mut cursor) = self.cursor_of(handle)?;
        let mut done = 0;

        while done < buf.len() {
            let size = self.pages.index().size(identity);
            if cursor >= size {
                break;
            }

            let (block_offset, in_block) = self.split(cursor);
            let left_in_file = usize::try_from(size - cursor).unwrap_or(usize::MAX);
            let to_copy = (buf.len() - done)
                .min(self.config.block_size - in_block)
                .min(left_in_file);

            let key = PageKey::new(identity, block_offset);
            let id = match self.pages.lookup(key) {
                Some(id) => {
                    CacheStats::bump(&self.stats.hits);
                    id
                }
                None => {
                    // Below the logical size a block missing from the file
                    // is a hole left by unflushed writes and reads as zeros
                    let data = self.load(handle, key)?;
                    self.pages.insert(Page::new(key, data, handle))
                }
            };

            let page = &mut self.pages[id];
            page.touch(handle);
            buf[done..done + to_copy]
                .copy_from_slice(&page.data().as_slice()[in_block..in_block + to_copy]);

            done += to_copy;
            cursor += to_copy as u64;
        }

        self.handles.get_mut(handle)?.set_cursor(cursor);
        Ok(done)
    }

    /// Write all of `buf` at the handle's cursor
    ///
    /// Blocks not yet resident are loaded first so bytes around the
    /// written range keep their content.
    ///
    /// Blocks are written in order. If making room for a later block fails,
    /// the blocks before it stay modified and dirty and the logical size
    /// keeps their growth, but the cursor does not move and the error is
    /// returned.
    pub fn write(&mut self, handle: HandleId, buf: &[u8]) -> Result<usize> {
        let (identity, mut cursor) = self.cursor_of(handle)?;
        let mut done = 0;

        while done < buf.len() {
            let (block_offset, in_block) = self.split(cursor);
            let to_copy = (buf.len() - done).min(self.config.block_size - in_block);

            // Resolved once, used for both the copy and the dirty mark
            let key = PageKey::new(identity, block_offset);
            let id = match self.pages.lookup(key) {
                Some(id) => {
                    CacheStats::bump(&self.stats.hits);
                    id
                }
                None => {
                    let data = self.load(handle, key)?;
                    self.pages.insert(Page::new(key, data, handle))
                }
            };

            let page = &mut self.pages[id];
            page.touch(handle);
            page.data_mut().as_mut_slice()[in_block..in_block + to_copy]
                .copy_from_slice(&buf[done..done + to_copy]);
            self.pages.mark_dirty(id);

            done += to_copy;
            cursor += to_copy as u64;
            self.pages.index_mut().grow(identity, cursor);
        }

        self.handles.get_mut(handle)?.set_cursor(cursor);
        Ok(done)
    }

    /// Move the handle's cursor
    ///
    /// `Current` is relative to the handle's cursor and `End` to the
    /// file's logical size, which counts writes not yet flushed.
    pub fn seek(&mut self, handle: HandleId, pos: SeekFrom) -> Result<u64> {
        let h = self.handles.get(handle)?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => h.cursor().checked_add_signed(delta),
            SeekFrom::End(delta) => self
                .pages
                .index()
                .size(h.identity())
                .checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            Error::io(
                "lseek",
                h.cursor(),
                io::Error::new(io::ErrorKind::InvalidInput, format!("invalid seek to {pos:?}")),
            )
        })?;

        let position = h.file().seek(SeekFrom::Start(target))?;
        self.handles.get_mut(handle)?.set_cursor(position);
        Ok(position)
    }

    /// Write back every dirty page of the handle's file and sync it
    ///
    /// A failed page does not stop the others from being flushed; it stays
    /// dirty and the failures are reported together afterwards.
    pub fn fsync(&mut self, handle: HandleId) -> Result<()> {
        let identity = self.handles.get(handle)?.identity();
        let logical_size = self.pages.index().size(identity);
        let dirty = self.pages.dirty_pages(identity);
        let attempted = dirty.len();
        let mut failed = 0;

        for id in dirty {
            match Self::write_back(&self.handles, &self.stats, &self.pages[id], logical_size) {
                Ok(()) => {
                    self.pages.mark_clean(id);
                }
                Err(_) => failed += 1,
            }
        }

        if failed > 0 {
            return Err(Error::PartialFlush { failed, attempted });
        }

        self.handles.get(handle)?.file().sync()?;
        debug!(%handle, %identity, flushed = attempted, "fsync");
        Ok(())
    }

    fn cursor_of(&self, handle: HandleId) -> Result<(FileIdentity, u64)> {
        let h = self.handles.get(handle)?;
        Ok((h.identity(), h.cursor()))
    }

    /// Split a byte position into its block offset and offset within the block
    fn split(&self, position: u64) -> (u64, usize) {
        let block_size = self.config.block_size as u64;
        let in_block = position % block_size;
        (position - in_block, in_block as usize)
    }

    /// Read the block for `key` from the handle's file, evicting first if full
    ///
    /// Bytes past the end of the file come back zeroed.
    fn load(&mut self, handle: HandleId, key: PageKey) -> Result<AlignedBuffer> {
        CacheStats::bump(&self.stats.misses);

        let mut data = match self.make_room()? {
            Some(recycled) => recycled,
            None => AlignedBuffer::new(self.config.block_size)?,
        };

        let file = self.handles.get(handle)?.file();
        CacheStats::bump(&self.stats.backing_reads);
        let loaded = load_block(file, key.offset, &mut data)?;

        debug!(page = %key, bytes = loaded, "loaded block");
        Ok(data)
    }

    /// Evict the oldest page if the store is full, returning its buffer
    fn make_room(&mut self) -> Result<Option<AlignedBuffer>> {
        if !self.pages.is_full() {
            return Ok(None);
        }

        let handles = &self.handles;
        let stats = &self.stats;
        let evicted = self
            .pages
            .evict_oldest(|page, logical_size| {
                Self::write_back(handles, stats, page, logical_size)
            })?;

        Ok(evicted.map(|page| {
            CacheStats::bump(&self.stats.evictions);
            page.into_buffer()
        }))
    }

    fn write_back(
        handles: &HandleRegistry,
        stats: &CacheStats,
        page: &Page,
        logical_size: u64,
    ) -> Result<()> {
        let result = Self::store_page(handles, stats, page, logical_size);
        match &result {
            Ok(()) => CacheStats::bump(&stats.writebacks),
            Err(e) => {
                CacheStats::bump(&stats.writeback_failures);
                warn!(page = %page.key(), error = %e, "write-back failed, page stays dirty");
            }
        }
        result
    }

    fn store_page(
        handles: &HandleRegistry,
        stats: &CacheStats,
        page: &Page,
        logical_size: u64,
    ) -> Result<()> {
        let writer = handles
            .writer_for(page.identity(), page.last_handle())
            .ok_or_else(|| {
                Error::io(
                    "write-back",
                    page.offset(),
                    io::Error::new(
                        io::ErrorKind::NotConnected,
                        format!("no open handle on {}", page.identity()),
                    ),
                )
            })?;

        CacheStats::bump(&stats.backing_writes);
        store_block(writer.file(), page.offset(), page.data())?;

        // The whole-block write may overshoot the logical end of the file
        let block_end = page.offset() + page.data().len() as u64;
        if block_end > logical_size {
            writer.file().set_len(logical_size)?;
        }

        debug!(page = %page.key(), via = %writer.id(), "wrote back page");
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        for handle in self.handles.ids() {
            if let Err(e) = self.fsync(handle) {
                warn!(%handle, error = %e, "flush on drop failed");
            }
        }
    }
}
