//! Fixed-arena page allocator
//!
//! Owns one contiguous anonymous mapping sliced into equal-sized pages and
//! hands out reference-counted page handles. Pages return to the free pool
//! exactly when their last holder releases them. The arena content is never
//! read or written by the simulator; only page lifetimes matter.
//!
//! ## Concurrency
//!
//! The free list is a LIFO stack behind a mutex. `alloc` (the 0 -> 1
//! refcount transition) and `dec_ref` (the transition back to 0) serialize
//! on that mutex. `inc_ref` is a relaxed atomic increment and is legal only
//! while the caller already holds a reference to the page: a page whose
//! refcount is positive cannot be reclaimed out from under the caller, so
//! the increment can never race with the free-list push in `dec_ref`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{Result, SimError};

/// Handle to one fixed-size page of the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(usize);

impl PageId {
    /// Index of this page within the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Per-page descriptor, parallel to the arena
#[derive(Debug)]
struct PageMeta {
    ref_count: AtomicU32,
}

/// Allocator over a single contiguous arena of fixed-size pages
pub struct PageAllocator {
    /// Anonymous mapping backing every page; reserved once, released on drop
    arena: MmapMut,
    page_bytes: usize,
    num_pages: usize,
    pages: Vec<PageMeta>,
    /// Free page handles, popped from the tail for cache warmth
    free: Mutex<Vec<PageId>>,
}

impl PageAllocator {
    /// Create an allocator with `arena_bytes / page_bytes` pages, all free
    ///
    /// # Errors
    /// Returns `SimError::InvalidConfig` when the arena cannot hold one
    /// page, or `SimError::ArenaMap` when the OS refuses the mapping.
    pub fn new(page_bytes: usize, arena_bytes: usize) -> Result<Self> {
        if page_bytes == 0 || arena_bytes < page_bytes {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "arena of {arena_bytes} bytes cannot hold a single {page_bytes} byte page"
                ),
            });
        }

        let num_pages = arena_bytes / page_bytes;
        let arena_size = num_pages * page_bytes;
        let arena = MmapOptions::new()
            .len(arena_size)
            .map_anon()
            .map_err(|e| SimError::ArenaMap {
                arena_bytes: arena_size,
                reason: e.to_string(),
            })?;

        let pages = (0..num_pages)
            .map(|_| PageMeta {
                ref_count: AtomicU32::new(0),
            })
            .collect();
        let free = (0..num_pages).map(PageId).collect();

        Ok(Self {
            arena,
            page_bytes,
            num_pages,
            pages,
            free: Mutex::new(free),
        })
    }

    /// Pop a free page; its refcount starts at 1
    ///
    /// # Errors
    /// Returns `SimError::OutOfPages` when the free list is empty. This is
    /// fatal by design: the simulator surfaces the capacity envelope
    /// instead of modeling eviction.
    pub fn alloc(&self) -> Result<PageId> {
        let mut free = self.lock_free()?;
        let page = free.pop().ok_or(SimError::OutOfPages {
            num_pages: self.num_pages,
        })?;
        self.pages[page.index()].ref_count.store(1, Ordering::Release);
        Ok(page)
    }

    /// Add a reference to a page the caller already holds
    ///
    /// Caller invariant: at least one reference to `page` is held for the
    /// duration of this call. Incrementing from zero is a bookkeeping bug
    /// and is not detected here.
    pub fn inc_ref(&self, page: PageId) {
        self.pages[page.index()].ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a reference; at zero the page returns to the free pool
    ///
    /// # Errors
    /// Returns `SimError::RefcountUnderflow` if the page was already free.
    pub fn dec_ref(&self, page: PageId) -> Result<()> {
        let mut free = self.lock_free()?;
        let meta = &self.pages[page.index()];
        if meta.ref_count.load(Ordering::Acquire) == 0 {
            return Err(SimError::RefcountUnderflow { page: page.index() });
        }
        if meta.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            free.push(page);
        }
        Ok(())
    }

    /// Count of pages with a positive refcount
    pub fn pages_in_use(&self) -> usize {
        // Hold the free-list lock so no alloc/dec_ref transition is in
        // flight while the descriptors are scanned.
        let _free = match self.lock_free() {
            Ok(guard) => guard,
            Err(_) => return 0,
        };
        self.pages
            .iter()
            .filter(|meta| meta.ref_count.load(Ordering::Relaxed) > 0)
            .count()
    }

    /// Count of pages on the free list
    pub fn free_pages(&self) -> usize {
        self.lock_free().map_or(0, |free| free.len())
    }

    /// Configured page size in bytes
    pub fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    /// Total pages in the arena
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Bytes actually reserved for the arena
    pub fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    fn lock_free(&self) -> Result<std::sync::MutexGuard<'_, Vec<PageId>>> {
        self.free.lock().map_err(|_| SimError::LockPoisoned {
            what: "page allocator free list",
        })
    }
}

impl std::fmt::Debug for PageAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("page_bytes", &self.page_bytes)
            .field("num_pages", &self.num_pages)
            .field("pages_in_use", &self.pages_in_use())
            .finish()
    }
}
