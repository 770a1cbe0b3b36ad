//! End-to-end simulation scenarios
//!
//! Each test drives a full concurrent batch through a backend and checks
//! the accounting against closed-form expectations. The reference
//! configuration throughout: 4 layers x 8 heads x 64 dim (8192 bytes per
//! token), 16 tokens per page (131072 bytes per page).

use reservar::{
    run_simulation, KvBackend, MonolithicBackend, PagedBackend, SequenceWork, SimConfig, SimError,
};

const BYTES_PER_TOKEN: usize = 8192;
const PAGE_BYTES: usize = 131072;

fn reference_config(num_groups: usize) -> SimConfig {
    SimConfig {
        num_groups,
        enable_sleep: false,
        ..SimConfig::default()
    }
}

fn unshared(prompt: usize, gen: usize) -> SequenceWork {
    SequenceWork {
        prompt_tokens: prompt,
        gen_tokens: gen,
        shared_prompt_tokens: 0,
        shared_prompt_id: None,
    }
}

fn grouped(prompt: usize, gen: usize, prefix: usize, group: usize) -> SequenceWork {
    SequenceWork {
        prompt_tokens: prompt,
        gen_tokens: gen,
        shared_prompt_tokens: prefix,
        shared_prompt_id: Some(group),
    }
}

#[test]
fn scenario_no_sharing_exact_page_fit() {
    // 128 sequences, 256 prompt + 256 gen, no groups.
    let cfg = reference_config(0);
    let work = vec![unshared(256, 256); 128];

    let mono = MonolithicBackend::new(cfg.clone()).expect("mono backend");
    let mono_stats = run_simulation(&mono, &cfg, &work).expect("mono run");
    assert_eq!(mono_stats.logical_tokens, 128 * 512);
    assert_eq!(mono_stats.logical_bytes, 128 * 512 * BYTES_PER_TOKEN);
    assert_eq!(mono_stats.physical_bytes, 128 * 2048 * BYTES_PER_TOKEN);

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    let paged_stats = run_simulation(&paged, &cfg, &work).expect("paged run");
    assert_eq!(paged_stats.logical_tokens, 128 * 512);
    // 512 tokens fill exactly 32 pages; waste is zero.
    assert_eq!(paged_stats.physical_bytes, 128 * 32 * PAGE_BYTES);
    assert_eq!(paged_stats.physical_bytes, paged_stats.logical_bytes);
}

#[test]
fn scenario_one_group_sharing_beats_logical() {
    // 128 sequences all in one group: 256 shared prefix + 256 gen.
    let cfg = reference_config(1);
    let work = vec![grouped(256, 256, 256, 0); 128];

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    let stats = run_simulation(&paged, &cfg, &work).expect("paged run");

    assert_eq!(stats.logical_tokens, 128 * 512);
    assert_eq!(stats.logical_bytes, 128 * 512 * BYTES_PER_TOKEN);
    // 16 shared prefix pages + 16 private suffix pages per sequence.
    assert_eq!(paged.pages_in_use(), 16 + 128 * 16);
    assert_eq!(stats.physical_bytes, (16 + 128 * 16) * PAGE_BYTES);
    assert!(stats.physical_bytes < stats.logical_bytes);
}

#[test]
fn scenario_four_groups_random_suffixes() {
    // 4 groups x 32 sequences, 256 shared prefix, varying suffix lengths.
    let cfg = reference_config(4);
    let suffixes: Vec<usize> = (0..128).map(|i| 256 + (i * 6) % 769).collect();
    let work: Vec<SequenceWork> = suffixes
        .iter()
        .enumerate()
        .map(|(i, &suffix)| grouped(256, suffix, 256, i % 4))
        .collect();

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    run_simulation(&paged, &cfg, &work).expect("paged run");

    let expected_suffix_pages: usize = suffixes.iter().map(|s| s.div_ceil(16)).sum();
    assert_eq!(paged.pages_in_use(), 4 * 16 + expected_suffix_pages);
}

#[test]
fn scenario_out_of_pages_capacity_fault() {
    // 8 pages cannot hold 8 sequences x 64 tokens (32 pages needed).
    let cfg = SimConfig {
        num_sequences: 8,
        arena_bytes: 8 * PAGE_BYTES,
        ..reference_config(0)
    };
    let work = vec![unshared(32, 32); 8];

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    let err = run_simulation(&paged, &cfg, &work).unwrap_err();
    assert_eq!(err, SimError::OutOfPages { num_pages: 8 });
}

#[test]
fn scenario_lifecycle_drains_to_prefix_pages() {
    let cfg = reference_config(2);
    let work: Vec<SequenceWork> = (0..16).map(|i| grouped(256, 64, 256, i % 2)).collect();

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    run_simulation(&paged, &cfg, &work).expect("paged run");
    assert!(paged.pages_in_use() > 2 * 16);

    for id in 0..16 {
        paged
            .finish_sequence(reservar::SeqId::new(id))
            .expect("finish");
    }
    // Only the two groups' table-held prefix pages remain.
    assert_eq!(paged.pages_in_use(), 2 * 16);
    assert_eq!(paged.prefix_pages().expect("prefix"), 2 * 16);
}

#[test]
fn scenario_context_clamp_end_to_end() {
    let cfg = SimConfig {
        num_sequences: 1,
        max_context_tokens: 128,
        ..reference_config(0)
    };
    let work = vec![unshared(100, 128 + 100)];

    let paged = PagedBackend::new(cfg.clone()).expect("paged backend");
    let stats = run_simulation(&paged, &cfg, &work).expect("paged run");
    assert_eq!(stats.logical_tokens, 128);
    assert_eq!(paged.pages_in_use(), 128 / 16);

    let mono = MonolithicBackend::new(cfg.clone()).expect("mono backend");
    let stats = run_simulation(&mono, &cfg, &work).expect("mono run");
    assert_eq!(stats.logical_tokens, 128);
}

#[test]
fn scenario_driver_ignores_backend_identity() {
    // The same driver code path runs either variant behind the trait.
    let cfg = SimConfig {
        num_sequences: 4,
        ..reference_config(0)
    };
    let work = vec![unshared(16, 16); 4];

    let backends: Vec<Box<dyn KvBackend>> = vec![
        Box::new(MonolithicBackend::new(cfg.clone()).expect("mono")),
        Box::new(PagedBackend::new(cfg.clone()).expect("paged")),
    ];
    for backend in &backends {
        let stats = run_simulation(backend.as_ref(), &cfg, &work).expect("run");
        assert_eq!(stats.logical_tokens, 4 * 32);
        assert_eq!(stats.logical_bytes, 4 * 32 * BYTES_PER_TOKEN);
    }
}
