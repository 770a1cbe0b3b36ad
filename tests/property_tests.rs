//! Property-based tests using proptest
//!
//! Generalizes the closed-form accounting checks:
//! - allocator conservation under arbitrary alloc/release interleavings
//! - paged physical bytes formula without sharing
//! - paged physical bytes formula with one shared group
//! - monolithic reservation independent of the workload
//! - context clamp bound

use proptest::prelude::*;

use reservar::{KvBackend, MonolithicBackend, PageAllocator, PagedBackend, SequenceWork, SimConfig};

fn small_config(num_groups: usize) -> SimConfig {
    SimConfig {
        num_sequences: 8,
        num_groups,
        max_context_tokens: 512,
        arena_bytes: 131072 * 1024,
        ..SimConfig::default()
    }
}

fn append_n(backend: &dyn KvBackend, id: reservar::SeqId, n: usize) {
    for _ in 0..n {
        backend.append_token(id).expect("append");
    }
}

proptest! {
    /// pages_in_use + free_pages == num_pages across arbitrary
    /// alloc/inc/dec interleavings
    #[test]
    fn prop_allocator_conservation(ops in prop::collection::vec(0u8..3, 1..200)) {
        let pa = PageAllocator::new(4096, 64 * 4096).expect("allocator");
        let mut held: Vec<reservar::PageId> = Vec::new();

        for op in ops {
            match op {
                0 => {
                    if let Ok(page) = pa.alloc() {
                        held.push(page);
                    }
                }
                1 => {
                    if let Some(&page) = held.last() {
                        // Holding a reference already, so inc then record
                        // the extra share.
                        pa.inc_ref(page);
                        held.push(page);
                    }
                }
                _ => {
                    if let Some(page) = held.pop() {
                        pa.dec_ref(page).expect("dec_ref");
                    }
                }
            }
            prop_assert_eq!(pa.pages_in_use() + pa.free_pages(), pa.num_pages());
        }

        for page in held {
            pa.dec_ref(page).expect("dec_ref");
        }
        prop_assert_eq!(pa.pages_in_use(), 0);
    }

    /// Without sharing, physical bytes are exactly the per-sequence page
    /// counts summed
    #[test]
    fn prop_paged_physical_matches_page_count(
        tokens in prop::collection::vec(0usize..512, 1..8)
    ) {
        let cfg = small_config(0);
        let backend = PagedBackend::new(cfg.clone()).expect("backend");

        for &t in &tokens {
            let id = backend.init_sequence(&SequenceWork {
                prompt_tokens: t,
                gen_tokens: 0,
                shared_prompt_tokens: 0,
                shared_prompt_id: None,
            }).expect("init");
            append_n(&backend, id, t);
        }

        let expected_pages: usize = tokens.iter().map(|t| t.div_ceil(16)).sum();
        let stats = backend.stats().expect("stats");
        prop_assert_eq!(stats.physical_bytes, expected_pages * 131072);
        prop_assert_eq!(stats.logical_tokens, tokens.iter().sum::<usize>());
    }

    /// With one group, prefix pages are counted once and suffixes are
    /// private
    #[test]
    fn prop_paged_shared_prefix_counted_once(
        prefix_pages in 1usize..8,
        suffixes in prop::collection::vec(0usize..256, 1..8)
    ) {
        let cfg = small_config(1);
        let backend = PagedBackend::new(cfg.clone()).expect("backend");
        let prefix = prefix_pages * 16;

        for &suffix in &suffixes {
            let id = backend.init_sequence(&SequenceWork {
                prompt_tokens: prefix,
                gen_tokens: suffix,
                shared_prompt_tokens: prefix,
                shared_prompt_id: Some(0),
            }).expect("init");
            append_n(&backend, id, prefix + suffix);
        }

        let suffix_pages: usize = suffixes.iter().map(|s| s.div_ceil(16)).sum();
        prop_assert_eq!(backend.pages_in_use(), prefix_pages + suffix_pages);
    }

    /// Monolithic reservation never depends on how many tokens arrive
    #[test]
    fn prop_monolithic_upper_bound_exact(
        tokens in prop::collection::vec(0usize..600, 1..8)
    ) {
        let cfg = small_config(0);
        let backend = MonolithicBackend::new(cfg.clone()).expect("backend");

        for &t in &tokens {
            let id = backend.init_sequence(&SequenceWork {
                prompt_tokens: t,
                gen_tokens: 0,
                shared_prompt_tokens: 0,
                shared_prompt_id: None,
            }).expect("init");
            append_n(&backend, id, t);
        }

        let stats = backend.stats().expect("stats");
        prop_assert_eq!(
            stats.physical_bytes,
            tokens.len() * cfg.max_context_tokens * cfg.bytes_per_token()
        );
    }

    /// No sequence ever exceeds the context ceiling
    #[test]
    fn prop_context_clamp(extra in 0usize..300) {
        let cfg = SimConfig {
            max_context_tokens: 96,
            ..small_config(0)
        };
        let backend = PagedBackend::new(cfg).expect("backend");
        let id = backend.init_sequence(&SequenceWork {
            prompt_tokens: 0,
            gen_tokens: 0,
            shared_prompt_tokens: 0,
            shared_prompt_id: None,
        }).expect("init");

        append_n(&backend, id, 96 + extra);
        let stats = backend.stats().expect("stats");
        prop_assert_eq!(stats.logical_tokens, 96);
        prop_assert!(backend.pages_in_use() <= 96usize.div_ceil(16));
    }
}
