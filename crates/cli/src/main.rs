//! Command line for building and inspecting token-chunk caches.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mlm_common::{
    cache_dir, ingest, HfTokenizer, IngestOutcome, MmapTextDataset, PretrainConfig,
};

#[derive(Parser, Debug)]
#[command(name = "mlm", about = "Masked-LM pretraining data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build cache/train.bin and cache/val.bin for a corpus directory.
    Ingest(IngestArgs),
    /// Print the shape (and optionally a row) of a cache file.
    Inspect(InspectArgs),
}

// ── Ingest ──────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct IngestArgs {
    /// Directory holding the *.txt corpus; the cache is created inside it.
    #[arg(long)]
    input_dir: PathBuf,
    /// Hugging Face tokenizer.json.
    #[arg(long)]
    tokenizer: PathBuf,
    /// Pipeline config JSON; created with defaults when absent.
    #[arg(long, default_value = "pretrain.json")]
    config: PathBuf,
}

// ── Inspect ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct InspectArgs {
    /// A cache file (train.bin or val.bin).
    #[arg(long)]
    cache: PathBuf,
    #[arg(long)]
    seqlen: usize,
    /// Print this row's token ids.
    #[arg(long)]
    row: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ingest(args) => cmd_ingest(args),
        Command::Inspect(args) => cmd_inspect(args),
    }
}

// ── Command implementations ─────────────────────────────────────────────────

fn cmd_ingest(args: IngestArgs) -> Result<()> {
    let config = if args.config.exists() {
        PretrainConfig::load(&args.config)?
    } else {
        let default = PretrainConfig::default();
        default.save(&args.config)?;
        eprintln!("Created default config at {}", args.config.display());
        default
    };

    let tokenizer = HfTokenizer::from_file(&args.tokenizer, &config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    match ingest(&args.input_dir, &config, &tokenizer, &mut rng)? {
        IngestOutcome::Written {
            train_chunks,
            val_chunks,
        } => {
            eprintln!(
                "Wrote {} train / {} val chunks of length {} to {}",
                train_chunks,
                val_chunks,
                config.seqlen,
                cache_dir(&args.input_dir).display()
            );
        }
        IngestOutcome::CacheExists => {
            eprintln!(
                "Cache already exists at {}; delete the directory to regenerate",
                cache_dir(&args.input_dir).display()
            );
        }
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let dataset = MmapTextDataset::open(&args.cache, args.seqlen)?;
    eprintln!(
        "{}: {} chunks of {} tokens ({} bytes/record)",
        args.cache.display(),
        dataset.len(),
        dataset.seqlen(),
        dataset.seqlen() * 2
    );
    if let Some(row) = args.row {
        let ids = dataset.get(row)?;
        println!(
            "{}",
            ids.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
    Ok(())
}
