//! # Reservar
//!
//! KV cache memory accounting simulator: how many bytes does a batch of
//! concurrently decoding sequences really cost?
//!
//! Reservar (Spanish: "to reserve") drives the same synthetic decode
//! workload through two cache backends and compares the bytes the
//! application produced (logical) against the bytes the backend had to
//! reserve (physical):
//!
//! - a **monolithic** backend that pre-reserves a full context window per
//!   sequence, the way a backend without paging has to, and
//! - a **paged** backend that slices one arena into fixed-size pages,
//!   allocates them lazily on token arrival, and lets sequences in the
//!   same group alias refcounted shared-prefix pages.
//!
//! No real tensors exist; bytes are notional and page contents are never
//! read. Only allocation lifetimes matter.
//!
//! ## Example
//!
//! ```rust
//! use reservar::{generate_workload, run_simulation, PagedBackend, SimConfig};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let cfg = SimConfig {
//!     num_sequences: 8,
//!     ..SimConfig::default()
//! };
//! let work = generate_workload(&cfg, &mut StdRng::seed_from_u64(42));
//! let backend = PagedBackend::new(cfg.clone()).unwrap();
//! let stats = run_simulation(&backend, &cfg, &work).unwrap();
//! assert!(stats.physical_bytes <= cfg.arena_bytes);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod backend;
pub mod config;
pub mod error;
pub mod page_alloc;
pub mod report;
pub mod sim;
pub mod workload;

// Re-exports for convenience
pub use backend::{KvBackend, KvStats, MonolithicBackend, PagedBackend, SeqId};
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use page_alloc::{PageAllocator, PageId};
pub use report::{BackendReport, ComparisonReport};
pub use sim::run_simulation;
pub use workload::{generate_workload, SequenceWork};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
