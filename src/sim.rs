//! Simulation driver
//!
//! Spawns one decode worker per sequence and lets them run to their
//! predetermined token counts in parallel. Workers do not finish their
//! sequences: the point of the run is the peak reservation with every
//! sequence live, and teardown happens when the backend is dropped.

use std::thread;
use std::time::Duration;

use crate::backend::{KvBackend, KvStats};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::workload::SequenceWork;

/// Per-token compute latency emulated when `enable_sleep` is set
const TOKEN_SLEEP: Duration = Duration::from_micros(100);

fn decode_worker(
    backend: &dyn KvBackend,
    cfg: &SimConfig,
    work: &SequenceWork,
) -> Result<()> {
    let id = backend.init_sequence(work)?;

    for _ in 0..work.prompt_tokens {
        backend.append_token(id)?;
        if cfg.enable_sleep {
            thread::sleep(TOKEN_SLEEP);
        }
    }
    for _ in 0..work.gen_tokens {
        backend.append_token(id)?;
        if cfg.enable_sleep {
            thread::sleep(TOKEN_SLEEP);
        }
    }
    Ok(())
}

/// Run every sequence of `work` against `backend` and snapshot the stats
///
/// # Errors
/// Propagates the first worker failure (out of pages, poisoned lock) or
/// reports `SimError::WorkerPanic` if a worker thread panicked.
pub fn run_simulation(
    backend: &dyn KvBackend,
    cfg: &SimConfig,
    work: &[SequenceWork],
) -> Result<KvStats> {
    thread::scope(|scope| {
        let handles: Vec<_> = work
            .iter()
            .map(|w| scope.spawn(move || decode_worker(backend, cfg, w)))
            .collect();

        let mut outcome = Ok(());
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
                Err(_) => {
                    if outcome.is_ok() {
                        outcome = Err(SimError::WorkerPanic);
                    }
                }
            }
        }
        outcome
    })?;

    backend.stats()
}
