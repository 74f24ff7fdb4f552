//! Page-level cache sitting between a table's on-disk file and its higher
//! layers (memtable flush, index rebuild, scans).
//!
//! - LRU-based in-memory page cache, one per table
//! - Dirty tracking: a page is flushed only if it was fetched mutably
//!   since the last flush
//! - Read-through to the underlying file on a cache miss

#[cfg(test)]
mod tests;

use common::{DbResult, PageId};
use hashbrown::HashSet;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;
use storage::{HeapFile, Page, FIRST_DATA_PAGE};

/// Abstraction for fetching, allocating, and flushing pages of a single
/// table's file.
pub trait Pager {
    /// Fetch a page read-only, loading it from disk on a cache miss.
    fn fetch_page(&mut self, pid: PageId) -> DbResult<&Page>;

    /// Fetch a page for mutation. The page is marked dirty immediately:
    /// callers are expected to write through the returned reference.
    fn fetch_page_mut(&mut self, pid: PageId) -> DbResult<&mut Page>;

    /// Allocate a new page past the current end of the file.
    fn allocate_page(&mut self) -> DbResult<PageId>;

    /// Flush all dirty pages to disk. After flushing, all pages are clean.
    fn flush(&mut self) -> DbResult<()>;
}

/// LRU page cache backed by a single table's `HeapFile`.
#[derive(Debug)]
pub struct PageCache {
    file: HeapFile,
    cache: LruCache<PageId, Page>,
    dirty: HashSet<PageId>,
}

impl PageCache {
    pub fn open(path: &Path, capacity_pages: usize) -> DbResult<Self> {
        assert!(capacity_pages > 0, "capacity_pages must be > 0");
        Ok(Self {
            file: HeapFile::open(path)?,
            cache: LruCache::new(NonZeroUsize::new(capacity_pages).unwrap()),
            dirty: HashSet::new(),
        })
    }

    fn load(&mut self, pid: PageId) -> DbResult<Page> {
        self.file.read_page(pid.0)
    }

    fn evict_if_needed(&mut self) -> DbResult<()> {
        if self.cache.len() < self.cache.cap().get() {
            return Ok(());
        }
        if let Some((pid, page)) = self.cache.pop_lru()
            && self.dirty.remove(&pid)
        {
            self.file.write_page(&page)?;
        }
        Ok(())
    }

    /// Read page 0's raw bytes, bypassing the slotted-tuple cache path:
    /// catalog metadata is not a cached record page.
    pub fn read_metadata_page(&mut self) -> DbResult<Page> {
        self.file.read_metadata_page()
    }

    pub fn write_metadata_page(&mut self, bytes: &[u8]) -> DbResult<()> {
        self.file.write_metadata_page(bytes)
    }

    pub fn num_pages(&self) -> DbResult<u64> {
        self.file.num_pages()
    }
}

impl Pager for PageCache {
    fn fetch_page(&mut self, pid: PageId) -> DbResult<&Page> {
        if !self.cache.contains(&pid) {
            let page = self.load(pid)?;
            self.evict_if_needed()?;
            self.cache.push(pid, page);
        }
        Ok(self.cache.get(&pid).expect("just inserted"))
    }

    fn fetch_page_mut(&mut self, pid: PageId) -> DbResult<&mut Page> {
        if !self.cache.contains(&pid) {
            let page = self.load(pid)?;
            self.evict_if_needed()?;
            self.cache.push(pid, page);
        }
        self.dirty.insert(pid);
        Ok(self.cache.get_mut(&pid).expect("just inserted"))
    }

    fn allocate_page(&mut self) -> DbResult<PageId> {
        let next = self.file.num_pages()?.max(FIRST_DATA_PAGE);
        let page = Page::new(next);
        self.file.write_page(&page)?;

        self.evict_if_needed()?;
        let pid = PageId(next);
        self.cache.push(pid, page);
        self.dirty.insert(pid);
        Ok(pid)
    }

    fn flush(&mut self) -> DbResult<()> {
        let dirty: Vec<PageId> = self.dirty.iter().copied().collect();
        for pid in dirty {
            if let Some(page) = self.cache.peek(&pid) {
                self.file.write_page(page)?;
                self.dirty.remove(&pid);
            }
        }
        Ok(())
    }
}
