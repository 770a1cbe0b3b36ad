//! Reservar CLI - KV cache memory accounting simulator
//!
//! Run a synthetic decode batch through the monolithic and paged backends
//! and compare logical against physical bytes.

use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;

use reservar::{
    generate_workload, run_simulation, BackendReport, ComparisonReport, KvBackend,
    MonolithicBackend, PagedBackend, Result, SimConfig,
};

/// Reservar - KV cache memory accounting simulator
#[derive(Parser)]
#[command(name = "reservar")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Fixed full-context reservation per sequence
    Monolithic,
    /// Lazily allocated pages with shared prefixes
    Paged,
    /// Run both and print both reports
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable report
    Text,
    /// JSON report
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation
    Run {
        /// Number of concurrently decoding sequences
        #[arg(long, default_value_t = 128)]
        sequences: usize,

        /// Number of shared-prefix groups (0 disables sharing)
        #[arg(long, default_value_t = 4)]
        groups: usize,

        /// Transformer layers
        #[arg(long, default_value_t = 4)]
        layers: usize,

        /// Attention heads per layer
        #[arg(long, default_value_t = 8)]
        heads: usize,

        /// Dimension per head
        #[arg(long, default_value_t = 64)]
        head_dim: usize,

        /// Page granularity in tokens
        #[arg(long, default_value_t = 16)]
        tokens_per_page: usize,

        /// Paged arena size in bytes
        #[arg(long, default_value_t = 2 << 30)]
        arena_bytes: usize,

        /// Per-sequence token ceiling
        #[arg(long, default_value_t = 2048)]
        max_context: usize,

        /// Shared prefix length in tokens for grouped sequences
        #[arg(long, default_value_t = 256)]
        shared_prefix: usize,

        /// Extra prompt tokens on top of the prefix, uniform in 0..=N
        #[arg(long, default_value_t = 128)]
        max_prompt_extra: usize,

        /// Minimum generated tokens per sequence
        #[arg(long, default_value_t = 128)]
        min_gen: usize,

        /// Maximum generated tokens per sequence
        #[arg(long, default_value_t = 512)]
        max_gen: usize,

        /// RNG seed for a reproducible workload
        #[arg(long)]
        seed: Option<u64>,

        /// Sleep 100us per token to emulate compute latency
        #[arg(long)]
        sleep: bool,

        /// Which backend(s) to exercise
        #[arg(long, value_enum, default_value_t = BackendChoice::Both)]
        backend: BackendChoice,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show version and configuration info
    Info,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            sequences,
            groups,
            layers,
            heads,
            head_dim,
            tokens_per_page,
            arena_bytes,
            max_context,
            shared_prefix,
            max_prompt_extra,
            min_gen,
            max_gen,
            seed,
            sleep,
            backend,
            format,
        } => {
            let cfg = SimConfig {
                num_layers: layers,
                num_heads: heads,
                head_dim,
                tokens_per_page,
                arena_bytes,
                max_context_tokens: max_context,
                num_sequences: sequences,
                num_groups: groups,
                shared_prefix_tokens: shared_prefix,
                max_prompt_extra,
                min_gen_tokens: min_gen,
                max_gen_tokens: max_gen,
                enable_sleep: sleep,
            };
            run_command(&cfg, seed, backend, format)
        }
        Commands::Info => {
            print_info();
            Ok(())
        }
    }
}

fn run_command(
    cfg: &SimConfig,
    seed: Option<u64>,
    backend: BackendChoice,
    format: OutputFormat,
) -> Result<()> {
    cfg.validate()?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let work = generate_workload(cfg, &mut rng);

    let mut reports = Vec::new();
    if backend != BackendChoice::Paged {
        let mono = MonolithicBackend::new(cfg.clone())?;
        let stats = run_simulation(&mono, cfg, &work)?;
        reports.push(BackendReport::new(mono.name(), stats));
    }
    if backend != BackendChoice::Monolithic {
        let paged = PagedBackend::new(cfg.clone())?;
        let stats = run_simulation(&paged, cfg, &work)?;
        reports.push(BackendReport::new(paged.name(), stats));
    }

    let comparison = ComparisonReport {
        bytes_per_token: cfg.bytes_per_token(),
        backends: reports,
    };
    match format {
        OutputFormat::Text => print!("{comparison}"),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&comparison).map_err(|e| {
                reservar::SimError::InvalidConfig {
                    reason: format!("failed to encode report: {e}"),
                }
            })?;
            println!("{json}");
        }
    }
    Ok(())
}

fn print_info() {
    println!("Reservar v{}", reservar::VERSION);
    println!("KV cache memory accounting simulator");
    println!();
    println!("Backends:");
    println!("  monolithic - fixed full-context reservation per sequence");
    println!("  paged      - lazy fixed-size pages with shared prefixes");
    println!();
    println!("Accounting:");
    println!("  logical_bytes  - tokens produced x bytes per token");
    println!("  physical_bytes - bytes the backend reserved (shared pages count once)");
}
