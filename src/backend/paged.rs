//! Paged KV cache backend
//!
//! Slices one arena into fixed-size pages, allocates them lazily as tokens
//! arrive, and lets every sequence in a group alias the same refcounted
//! prefix pages. Physical bytes are counted globally as
//! `pages_in_use * page_bytes`, so a shared page contributes once no matter
//! how many sequences hold it; that is what lets physical drop below
//! logical when sharing is effective.
//!
//! ## Locking
//!
//! The sequence vector grows under a write lock and hands out `Arc`s so a
//! sequence's state keeps a stable address for its lifetime. Each
//! sequence's slot table sits behind its own mutex; only that sequence's
//! worker thread writes it, so the lock is uncontended on the append path.
//! The shared-prefix table has its own mutex, touched only by
//! `init_sequence` and teardown. `cur_tokens` is atomic: the worker stores
//! it with release ordering after the slot is populated, and `stats` reads
//! it with acquire ordering from any thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::backend::{KvBackend, KvStats, SeqId};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::page_alloc::{PageAllocator, PageId};
use crate::workload::SequenceWork;

/// Ordered pages encoding one group's common prompt prefix
///
/// Built lazily by the first sequence that claims the group and immutable
/// afterwards. The table itself holds one refcount share per page; those
/// shares are released at backend teardown.
#[derive(Debug)]
struct SharedPrefix {
    pages: Vec<PageId>,
    prefix_tokens: usize,
}

/// Per-sequence slot table plus token counter
///
/// `slots[i]` covers logical token window `[i * tokens_per_page,
/// (i + 1) * tokens_per_page)`. A populated slot is either an alias of the
/// group prefix (attached in init) or a page allocated on first token
/// arrival in that window.
#[derive(Debug, Default)]
struct PagedSeqState {
    slots: Mutex<Vec<Option<PageId>>>,
    cur_tokens: AtomicUsize,
    shared_prefix_tokens: AtomicUsize,
}

/// Grow a slot table to hold at least `n` entries, doubling from 4
fn reserve_slots(slots: &mut Vec<Option<PageId>>, n: usize) {
    if slots.len() >= n {
        return;
    }
    let mut cap = slots.len().max(4);
    while cap < n {
        cap *= 2;
    }
    slots.resize(cap, None);
}

/// Backend that maps token windows onto lazily allocated arena pages
pub struct PagedBackend {
    cfg: SimConfig,
    alloc: PageAllocator,
    seqs: RwLock<Vec<Arc<PagedSeqState>>>,
    groups: Mutex<Vec<Option<SharedPrefix>>>,
}

impl PagedBackend {
    /// Create a paged backend with an empty arena
    ///
    /// # Errors
    /// Fails when the configuration is invalid or the arena mapping is
    /// refused by the OS.
    pub fn new(cfg: SimConfig) -> Result<Self> {
        cfg.validate()?;
        let alloc = PageAllocator::new(cfg.page_bytes(), cfg.arena_bytes)?;
        let groups = (0..cfg.num_groups).map(|_| None).collect();
        Ok(Self {
            cfg,
            alloc,
            seqs: RwLock::new(Vec::new()),
            groups: Mutex::new(groups),
        })
    }

    /// Pages currently holding at least one reference
    pub fn pages_in_use(&self) -> usize {
        self.alloc.pages_in_use()
    }

    /// Pages still on the free list
    pub fn free_pages(&self) -> usize {
        self.alloc.free_pages()
    }

    /// Configured page size in bytes
    pub fn page_bytes(&self) -> usize {
        self.alloc.page_bytes()
    }

    /// Total prefix pages held by initialized groups
    ///
    /// After every sequence is finished, `pages_in_use` settles at exactly
    /// this value until the backend is dropped.
    ///
    /// # Errors
    /// Fails only when a lock was poisoned.
    pub fn prefix_pages(&self) -> Result<usize> {
        let groups = self.lock_groups()?;
        Ok(groups
            .iter()
            .flatten()
            .map(|prefix| prefix.pages.len())
            .sum())
    }

    /// Page-aligned share of `work`'s prefix, zero when sharing is off
    fn shareable_tokens(&self, work: &SequenceWork) -> usize {
        if work.shared_prompt_id.is_none() || self.cfg.num_groups == 0 {
            return 0;
        }
        (work.shared_prompt_tokens / self.cfg.tokens_per_page) * self.cfg.tokens_per_page
    }

    /// Allocate the pages encoding a group prefix of `prefix_tokens`
    fn build_shared_prefix(&self, prefix_tokens: usize) -> Result<SharedPrefix> {
        let pages_needed = prefix_tokens.div_ceil(self.cfg.tokens_per_page);
        let mut pages = Vec::with_capacity(pages_needed);
        for _ in 0..pages_needed {
            match self.alloc.alloc() {
                Ok(page) => pages.push(page),
                Err(err) => {
                    // Unwind the partial build so the fatal error leaves
                    // the allocator consistent.
                    for page in pages {
                        self.alloc.dec_ref(page)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(SharedPrefix {
            pages,
            prefix_tokens,
        })
    }

    fn sequence(&self, id: SeqId) -> Result<Option<Arc<PagedSeqState>>> {
        let seqs = self.seqs.read().map_err(|_| SimError::LockPoisoned {
            what: "paged sequence vector",
        })?;
        Ok(seqs.get(id.value()).cloned())
    }

    fn lock_groups(&self) -> Result<std::sync::MutexGuard<'_, Vec<Option<SharedPrefix>>>> {
        self.groups.lock().map_err(|_| SimError::LockPoisoned {
            what: "shared prefix table",
        })
    }

    fn lock_slots<'a>(
        &self,
        seq: &'a PagedSeqState,
    ) -> Result<std::sync::MutexGuard<'a, Vec<Option<PageId>>>> {
        seq.slots.lock().map_err(|_| SimError::LockPoisoned {
            what: "sequence slot table",
        })
    }

    fn release_sequence(&self, seq: &PagedSeqState) -> Result<()> {
        let mut slots = self.lock_slots(seq)?;
        for slot in slots.iter_mut() {
            if let Some(page) = slot.take() {
                self.alloc.dec_ref(page)?;
            }
        }
        seq.cur_tokens.store(0, Ordering::Release);
        seq.shared_prefix_tokens.store(0, Ordering::Relaxed);
        Ok(())
    }
}

impl KvBackend for PagedBackend {
    fn init_sequence(&self, work: &SequenceWork) -> Result<SeqId> {
        let mut seqs = self.seqs.write().map_err(|_| SimError::LockPoisoned {
            what: "paged sequence vector",
        })?;

        let id = SeqId::new(seqs.len());
        let state = Arc::new(PagedSeqState::default());

        let shared_tokens = self.shareable_tokens(work);
        if shared_tokens > 0 {
            let gid = work.shared_prompt_id.unwrap_or(0) % self.cfg.num_groups;
            let mut groups = self.lock_groups()?;
            if groups[gid].is_none() {
                groups[gid] = Some(self.build_shared_prefix(shared_tokens)?);
            }
            if let Some(prefix) = &groups[gid] {
                // A later sequence whose declared prefix disagrees with the
                // already-built one adopts the group's value.
                let mut slots = self.lock_slots(&state)?;
                reserve_slots(&mut slots, prefix.pages.len());
                for (i, &page) in prefix.pages.iter().enumerate() {
                    // The table's own share keeps the page alive, so this
                    // increment can never race with reclamation.
                    self.alloc.inc_ref(page);
                    slots[i] = Some(page);
                }
                state
                    .shared_prefix_tokens
                    .store(prefix.prefix_tokens, Ordering::Relaxed);
            }
        }

        seqs.push(state);
        Ok(id)
    }

    fn append_token(&self, id: SeqId) -> Result<()> {
        let seq = self.sequence(id)?.ok_or_else(|| {
            let num_seqs = self.seqs.read().map_or(0, |s| s.len());
            SimError::SequenceNotFound {
                id: id.value(),
                num_seqs,
            }
        })?;

        let idx = seq.cur_tokens.load(Ordering::Relaxed);
        if idx >= self.cfg.max_context_tokens {
            return Ok(());
        }

        let page_idx = idx / self.cfg.tokens_per_page;
        {
            let mut slots = self.lock_slots(&seq)?;
            if slots.len() <= page_idx {
                reserve_slots(&mut slots, page_idx + 1);
            }
            if slots[page_idx].is_none() {
                slots[page_idx] = Some(self.alloc.alloc()?);
            }
        }

        // Publish the slot before the counter crosses into it.
        seq.cur_tokens.store(idx + 1, Ordering::Release);
        Ok(())
    }

    fn finish_sequence(&self, id: SeqId) -> Result<()> {
        match self.sequence(id)? {
            Some(seq) => self.release_sequence(&seq),
            None => Ok(()),
        }
    }

    fn stats(&self) -> Result<KvStats> {
        let seqs = self.seqs.read().map_err(|_| SimError::LockPoisoned {
            what: "paged sequence vector",
        })?;
        let logical_tokens: usize = seqs
            .iter()
            .map(|seq| seq.cur_tokens.load(Ordering::Acquire))
            .sum();
        drop(seqs);

        Ok(KvStats {
            logical_tokens,
            logical_bytes: logical_tokens * self.cfg.bytes_per_token(),
            physical_bytes: self.alloc.pages_in_use() * self.alloc.page_bytes(),
        })
    }

    fn name(&self) -> &'static str {
        "paged"
    }
}

impl Drop for PagedBackend {
    fn drop(&mut self) {
        let num_seqs = self.seqs.read().map_or(0, |seqs| seqs.len());
        for id in 0..num_seqs {
            let _ = self.finish_sequence(SeqId::new(id));
        }
        if let Ok(mut groups) = self.groups.lock() {
            for slot in groups.iter_mut() {
                if let Some(prefix) = slot.take() {
                    for page in prefix.pages {
                        let _ = self.alloc.dec_ref(page);
                    }
                }
            }
        }
        debug_assert_eq!(self.alloc.pages_in_use(), 0, "pages leaked at teardown");
    }
}
