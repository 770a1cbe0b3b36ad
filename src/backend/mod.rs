//! KV cache backend contract
//!
//! Both memory strategies sit behind the [`KvBackend`] trait so the driver
//! never depends on which one it is exercising. A backend hands out
//! [`SeqId`]s, accepts tokens one at a time, and reports the logical versus
//! physical byte accounting that the whole simulation exists to compare.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::workload::SequenceWork;

pub mod monolithic;
pub mod paged;

pub use monolithic::MonolithicBackend;
pub use paged::PagedBackend;

/// Identifier of one decoding sequence within a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqId(usize);

impl SeqId {
    /// Wrap a raw index
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Raw index value
    pub fn value(self) -> usize {
        self.0
    }
}

/// Memory accounting snapshot for one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStats {
    /// Tokens actually appended across all live sequences
    pub logical_tokens: usize,
    /// `logical_tokens * bytes_per_token`
    pub logical_bytes: usize,
    /// Bytes the backend reserved to store those tokens
    pub physical_bytes: usize,
}

/// Contract shared by the monolithic and paged backends
///
/// Backends are driven by one worker thread per sequence: `append_token`
/// for a given id is only ever called by that sequence's own worker, while
/// `init_sequence` and `stats` may run concurrently from any thread.
pub trait KvBackend: Send + Sync {
    /// Register a new sequence and return its id
    ///
    /// # Errors
    /// Fails when the shared prefix cannot be built because the arena is
    /// out of pages, or when a lock was poisoned.
    fn init_sequence(&self, work: &SequenceWork) -> Result<SeqId>;

    /// Record one more token for `id`
    ///
    /// Appending past `max_context_tokens` is a silent no-op.
    ///
    /// # Errors
    /// Fails when a fresh page is needed and the arena is out of pages,
    /// when `id` was never issued, or when a lock was poisoned.
    fn append_token(&self, id: SeqId) -> Result<()>;

    /// Release everything `id` holds; a no-op for unknown or already
    /// finished sequences
    ///
    /// # Errors
    /// Fails only when a lock was poisoned.
    fn finish_sequence(&self, id: SeqId) -> Result<()>;

    /// Point-in-time accounting snapshot
    ///
    /// # Errors
    /// Fails only when a lock was poisoned.
    fn stats(&self) -> Result<KvStats>;

    /// Human-readable strategy name for reports
    fn name(&self) -> &'static str;
}
