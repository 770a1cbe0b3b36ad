//! Simulation configuration
//!
//! Model dimensions, page geometry, and workload knobs shared by both
//! backends and the driver. The model dimensions are never interpreted
//! individually; they only determine how many notional bytes one token of
//! KV activations occupies.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of transformer layers
    pub num_layers: usize,
    /// Number of attention heads per layer
    pub num_heads: usize,
    /// Dimension per attention head
    pub head_dim: usize,

    /// Page granularity in tokens (typically 16 or 32)
    pub tokens_per_page: usize,
    /// Size of the paged allocator's arena in bytes
    pub arena_bytes: usize,
    /// Per-sequence token ceiling; both backends clamp at this
    pub max_context_tokens: usize,

    /// Batch size: how many sequences decode concurrently
    pub num_sequences: usize,
    /// Number of shared-prefix groups; zero disables sharing
    pub num_groups: usize,
    /// Shared prefix length in tokens handed to grouped sequences
    /// (floored to a page multiple by the workload generator)
    pub shared_prefix_tokens: usize,
    /// Extra prompt tokens on top of the prefix, uniform in `0..=max`
    pub max_prompt_extra: usize,
    /// Minimum generated tokens per sequence
    pub min_gen_tokens: usize,
    /// Maximum generated tokens per sequence
    pub max_gen_tokens: usize,

    /// Sleep 100us per appended token to emulate compute latency
    pub enable_sleep: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_layers: 4,
            num_heads: 8,
            head_dim: 64,
            tokens_per_page: 16,
            arena_bytes: 2 << 30,
            max_context_tokens: 2048,
            num_sequences: 128,
            num_groups: 4,
            shared_prefix_tokens: 256,
            max_prompt_extra: 128,
            min_gen_tokens: 128,
            max_gen_tokens: 512,
            enable_sleep: false,
        }
    }
}

impl SimConfig {
    /// Bytes of KV activations per token: K and V, two bytes per
    /// half-precision element
    pub fn bytes_per_token(&self) -> usize {
        self.num_layers * self.num_heads * self.head_dim * 2 * 2
    }

    /// Bytes per page: `tokens_per_page * bytes_per_token`
    pub fn page_bytes(&self) -> usize {
        self.tokens_per_page * self.bytes_per_token()
    }

    /// Pages the arena holds: `arena_bytes / page_bytes`, floored
    pub fn num_pages(&self) -> usize {
        self.arena_bytes / self.page_bytes()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns `SimError::InvalidConfig` if any dimension is zero, the
    /// arena cannot hold a single page, or the generation range is empty.
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 || self.num_heads == 0 || self.head_dim == 0 {
            return Err(SimError::InvalidConfig {
                reason: "model dimensions must be positive".to_string(),
            });
        }
        if self.tokens_per_page == 0 {
            return Err(SimError::InvalidConfig {
                reason: "tokens_per_page must be positive".to_string(),
            });
        }
        if self.max_context_tokens == 0 {
            return Err(SimError::InvalidConfig {
                reason: "max_context_tokens must be positive".to_string(),
            });
        }
        if self.arena_bytes < self.page_bytes() {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "arena_bytes {} cannot hold a single {} byte page",
                    self.arena_bytes,
                    self.page_bytes()
                ),
            });
        }
        if self.min_gen_tokens > self.max_gen_tokens {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "min_gen_tokens {} exceeds max_gen_tokens {}",
                    self.min_gen_tokens, self.max_gen_tokens
                ),
            });
        }
        Ok(())
    }
}
