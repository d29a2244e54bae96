//! Resident pages, the FIFO eviction queue and the per-file index
//!
//! Pages live in an arena and are addressed by stable [`PageId`] slots.
//! The eviction queue stores ids in insertion order and the
//! [`InodeIndex`] maps `(identity, block offset)` to ids. Both are updated
//! together by [`PageStore`] so neither can name a page the other lacks.

use crate::raw_io::AlignedBuffer;
use blockcache_common::{FileIdentity, HandleId, PageKey, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::{Index, IndexMut};
use tracing::debug;

/// Stable slot index of a resident page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(usize);

/// One cached block
#[derive(Debug)]
pub struct Page {
    key: PageKey,
    data: AlignedBuffer,
    dirty: bool,
    last_handle: HandleId,
}

impl Page {
    pub fn new(key: PageKey, data: AlignedBuffer, handle: HandleId) -> Self {
        Self {
            key,
            data,
            dirty: false,
            last_handle: handle,
        }
    }

    pub fn key(&self) -> PageKey {
        self.key
    }

    pub fn identity(&self) -> FileIdentity {
        self.key.identity
    }

    /// Block-aligned byte offset within the file
    pub fn offset(&self) -> u64 {
        self.key.offset
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Handle that last read or wrote this page
    pub fn last_handle(&self) -> HandleId {
        self.last_handle
    }

    pub fn data(&self) -> &AlignedBuffer {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut AlignedBuffer {
        &mut self.data
    }

    pub(crate) fn touch(&mut self, handle: HandleId) {
        self.last_handle = handle;
    }

    /// Give back the buffer for reuse by another page
    pub fn into_buffer(self) -> AlignedBuffer {
        self.data
    }
}

/// Cached state for one backing file
#[derive(Debug, Default)]
struct InodeEntry {
    /// Block offset -> resident page
    blocks: BTreeMap<u64, PageId>,
    /// Logical length of the file, including unflushed writes
    size: u64,
}

/// Per-file mapping from block offset to resident page
#[derive(Debug, Default)]
pub struct InodeIndex {
    inodes: HashMap<FileIdentity, InodeEntry>,
}

impl InodeIndex {
    pub fn lookup(&self, key: PageKey) -> Option<PageId> {
        self.inodes
            .get(&key.identity)
            .and_then(|entry| entry.blocks.get(&key.offset).copied())
    }

    fn insert(&mut self, key: PageKey, id: PageId) -> Option<PageId> {
        self.inodes
            .entry(key.identity)
            .or_default()
            .blocks
            .insert(key.offset, id)
    }

    fn remove(&mut self, key: PageKey) -> Option<PageId> {
        self.inodes
            .get_mut(&key.identity)
            .and_then(|entry| entry.blocks.remove(&key.offset))
    }

    /// Resident pages of one file, in offset order
    pub fn pages_of(&self, identity: FileIdentity) -> impl Iterator<Item = (u64, PageId)> + '_ {
        self.inodes
            .get(&identity)
            .into_iter()
            .flat_map(|entry| entry.blocks.iter().map(|(&offset, &id)| (offset, id)))
    }

    /// Number of resident pages of one file
    pub fn resident(&self, identity: FileIdentity) -> usize {
        self.inodes.get(&identity).map_or(0, |entry| entry.blocks.len())
    }

    /// Logical size of a file (zero if never opened)
    pub fn size(&self, identity: FileIdentity) -> u64 {
        self.inodes.get(&identity).map_or(0, |entry| entry.size)
    }

    pub fn set_size(&mut self, identity: FileIdentity, size: u64) {
        self.inodes.entry(identity).or_default().size = size;
    }

    /// Extend the logical size to at least `end`
    pub fn grow(&mut self, identity: FileIdentity, end: u64) {
        let entry = self.inodes.entry(identity).or_default();
        entry.size = entry.size.max(end);
    }
}

/// Arena of resident pages with strict FIFO eviction
#[derive(Debug)]
pub struct PageStore {
    slots: Vec<Option<Page>>,
    free: Vec<PageId>,
    queue: VecDeque<PageId>,
    index: InodeIndex,
    capacity: usize,
    dirty: usize,
}

impl PageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            queue: VecDeque::with_capacity(capacity),
            index: InodeIndex::default(),
            capacity,
            dirty: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Number of resident dirty pages
    pub fn dirty_count(&self) -> usize {
        self.dirty
    }

    pub fn index(&self) -> &InodeIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut InodeIndex {
        &mut self.index
    }

    pub fn lookup(&self, key: PageKey) -> Option<PageId> {
        self.index.lookup(key)
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Mark a page modified; returns false if it already was
    pub fn mark_dirty(&mut self, id: PageId) -> bool {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(page) if !page.dirty => {
                page.dirty = true;
                self.dirty += 1;
                true
            }
            _ => false,
        }
    }

    /// Mark a page as flushed; returns false if it was not dirty
    pub fn mark_clean(&mut self, id: PageId) -> bool {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(page) if page.dirty => {
                page.dirty = false;
                self.dirty -= 1;
                true
            }
            _ => false,
        }
    }

    /// Dirty pages of one file, in offset order
    pub fn dirty_pages(&self, identity: FileIdentity) -> Vec<PageId> {
        self.index
            .pages_of(identity)
            .map(|(_, id)| id)
            .filter(|&id| self.get(id).is_some_and(Page::is_dirty))
            .collect()
    }

    pub fn has_dirty(&self, identity: FileIdentity) -> bool {
        self.index
            .pages_of(identity)
            .any(|(_, id)| self.get(id).is_some_and(Page::is_dirty))
    }

    /// Resident page keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = PageKey> + '_ {
        self.queue
            .iter()
            .filter_map(|&id| self.get(id).map(Page::key))
    }

    /// Add a page at the back of the eviction queue
    ///
    /// The caller must have made room first; a page already resident under
    /// the same key is never replaced.
    pub fn insert(&mut self, page: Page) -> PageId {
        debug_assert!(!self.is_full(), "insert into a full page store");
        debug_assert!(self.index.lookup(page.key).is_none(), "duplicate page {}", page.key);

        let key = page.key;
        if page.dirty {
            self.dirty += 1;
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id.0] = Some(page);
                id
            }
            None => {
                self.slots.push(Some(page));
                PageId(self.slots.len() - 1)
            }
        };
        self.queue.push_back(id);
        self.index.insert(key, id);
        id
    }

    /// Remove the oldest-inserted page
    ///
    /// A dirty victim is handed to `write_back` together with its file's
    /// logical size first. If that fails the victim stays resident and
    /// dirty and the error is returned. Returns `Ok(None)` when empty.
    pub fn evict_oldest<F>(&mut self, write_back: F) -> Result<Option<Page>>
    where
        F: FnOnce(&Page, u64) -> Result<()>,
    {
        let Some(&id) = self.queue.front() else {
            return Ok(None);
        };
        let Some(page) = self.get(id) else {
            return Ok(None);
        };

        let was_dirty = page.dirty;
        if was_dirty {
            write_back(page, self.index.size(page.identity()))?;
        }

        self.queue.pop_front();
        self.free.push(id);
        let Some(page) = self.slots[id.0].take() else {
            return Ok(None);
        };
        self.index.remove(page.key);
        if was_dirty {
            self.dirty -= 1;
        }

        debug!(page = %page.key, dirty = was_dirty, "evicted page");
        Ok(Some(page))
    }
}

impl Index<PageId> for PageStore {
    type Output = Page;

    /// Panics if the slot is vacant, like slice indexing out of bounds
    fn index(&self, id: PageId) -> &Page {
        match self.get(id) {
            Some(page) => page,
            None => panic!("no resident page in slot {}", id.0),
        }
    }
}

impl IndexMut<PageId> for PageStore {
    fn index_mut(&mut self, id: PageId) -> &mut Page {
        match self.get_mut(id) {
            Some(page) => page,
            None => panic!("no resident page in slot {}", id.0),
        }
    }
}
