//! Monolithic KV cache backend (baseline)
//!
//! Pre-reserves one maximum-context-sized buffer per sequence, the way a
//! backend without paging has to. The buffer bytes are really allocated,
//! not just counted, so an operator watching resident-set size from the
//! outside sees the footprint the stats predict. Accounting is a pair of
//! counters; the interesting number is how much of the reservation the
//! workload never touches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::backend::{KvBackend, KvStats, SeqId};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::workload::SequenceWork;

struct MonoSeqState {
    max_tokens: usize,
    cur_tokens: AtomicUsize,
    /// Eagerly allocated backing store; never read, held for its footprint
    kv_buffer: Vec<u8>,
}

/// Backend that reserves the full context window up front
pub struct MonolithicBackend {
    cfg: SimConfig,
    seqs: RwLock<Vec<Arc<MonoSeqState>>>,
}

impl MonolithicBackend {
    /// Create a monolithic backend with no sequences
    ///
    /// # Errors
    /// Fails when the configuration is invalid.
    pub fn new(cfg: SimConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            seqs: RwLock::new(Vec::new()),
        })
    }

    fn read_seqs(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Arc<MonoSeqState>>>> {
        self.seqs.read().map_err(|_| SimError::LockPoisoned {
            what: "monolithic sequence vector",
        })
    }
}

impl KvBackend for MonolithicBackend {
    fn init_sequence(&self, _work: &SequenceWork) -> Result<SeqId> {
        let mut seqs = self.seqs.write().map_err(|_| SimError::LockPoisoned {
            what: "monolithic sequence vector",
        })?;
        let id = SeqId::new(seqs.len());
        let max_tokens = self.cfg.max_context_tokens;
        seqs.push(Arc::new(MonoSeqState {
            max_tokens,
            cur_tokens: AtomicUsize::new(0),
            kv_buffer: vec![0u8; max_tokens * self.cfg.bytes_per_token()],
        }));
        Ok(id)
    }

    fn append_token(&self, id: SeqId) -> Result<()> {
        let seqs = self.read_seqs()?;
        let seq = seqs.get(id.value()).ok_or(SimError::SequenceNotFound {
            id: id.value(),
            num_seqs: seqs.len(),
        })?;
        let cur = seq.cur_tokens.load(Ordering::Relaxed);
        if cur < seq.max_tokens {
            seq.cur_tokens.store(cur + 1, Ordering::Release);
        }
        Ok(())
    }

    fn finish_sequence(&self, _id: SeqId) -> Result<()> {
        // Buffers persist until drop so stats observe the peak reservation.
        Ok(())
    }

    fn stats(&self) -> Result<KvStats> {
        let seqs = self.read_seqs()?;
        let mut stats = KvStats::default();
        for seq in seqs.iter() {
            stats.logical_tokens += seq.cur_tokens.load(Ordering::Acquire);
            stats.physical_bytes += seq.kv_buffer.len();
        }
        stats.logical_bytes = stats.logical_tokens * self.cfg.bytes_per_token();
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "monolithic"
    }
}
