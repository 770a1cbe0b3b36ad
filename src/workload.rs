//! Synthetic decode workload
//!
//! One [`SequenceWork`] record per sequence tells the driver how many
//! prompt and generation tokens to append, and tells the paged backend
//! whether the prompt begins with a group-shared prefix. Randomness comes
//! from a caller-supplied RNG so runs are reproducible under a fixed seed.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// Work description for one sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceWork {
    /// Prompt length in tokens, shared prefix included
    pub prompt_tokens: usize,
    /// Tokens to generate after the prompt
    pub gen_tokens: usize,
    /// Shareable prefix length in tokens; must be page-aligned to share
    pub shared_prompt_tokens: usize,
    /// Shared-prefix group, or `None` for an unshared sequence
    pub shared_prompt_id: Option<usize>,
}

/// Generate one work record per sequence
///
/// Sequences are assigned round-robin to groups (`i % num_groups`); with
/// `num_groups == 0` every sequence is unshared. Grouped sequences get a
/// page-aligned shared prefix of `cfg.shared_prefix_tokens` (floored to a
/// page multiple), and sharing is only requested with both a group id and
/// a positive prefix length set, so the paged backend always attaches the
/// prefix for grouped work.
pub fn generate_workload<R: Rng>(cfg: &SimConfig, rng: &mut R) -> Vec<SequenceWork> {
    let tokens_per_page = cfg.tokens_per_page.max(1);
    let prefix = (cfg.shared_prefix_tokens / tokens_per_page) * tokens_per_page;

    (0..cfg.num_sequences)
        .map(|i| {
            let group = if cfg.num_groups > 0 && prefix > 0 {
                Some(i % cfg.num_groups)
            } else {
                None
            };
            let shared = if group.is_some() { prefix } else { 0 };
            let extra = rng.gen_range(0..=cfg.max_prompt_extra);
            SequenceWork {
                prompt_tokens: shared + extra,
                gen_tokens: rng.gen_range(cfg.min_gen_tokens..=cfg.max_gen_tokens),
                shared_prompt_tokens: shared,
                shared_prompt_id: group,
            }
        })
        .collect()
}
