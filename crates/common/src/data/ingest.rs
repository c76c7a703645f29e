//! Corpus ingestion: raw `*.txt` documents → `cache/train.bin` + `cache/val.bin`.
//!
//! Each non-empty line is one document. Documents are chunked to `seqlen`,
//! each chunk is assigned to a bucket by an independent draw, and each bucket
//! is shuffled and serialised as a dense `(num_chunks, seqlen)` u16-LE array
//! with no header. The `cache/` directory is the completion sentinel: the
//! buckets are written into `cache.tmp/` and the directory is renamed into
//! place only once both files are durable, so a crash mid-write never leaves
//! a directory that passes for a finished cache.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use super::chunker::split_into_chunks;
use crate::config::PretrainConfig;
use crate::tokenizer::CorpusTokenizer;

/// Train-bucket file name under `cache/`.
pub const TRAIN_FILE: &str = "train.bin";
/// Validation-bucket file name under `cache/`.
pub const VAL_FILE: &str = "val.bin";

const CACHE_DIR: &str = "cache";
const STAGING_DIR: &str = "cache.tmp";

/// Where a corpus directory's finished cache lives.
pub fn cache_dir(input_dir: &Path) -> PathBuf {
    input_dir.join(CACHE_DIR)
}

/// What an [`ingest`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Both cache files were built and published.
    Written {
        train_chunks: usize,
        val_chunks: usize,
    },
    /// A `cache/` directory already exists; nothing was touched.
    CacheExists,
}

/// Build the binary chunk cache for `input_dir`.
///
/// No-op when `cache/` already exists — delete the directory to force
/// regeneration. The vocabulary bound is checked before any file I/O: ids
/// are stored as u16, so a tokenizer with 65535 or more entries is rejected
/// outright. Each chunk gets its own `draw > split` bucket assignment
/// (`train_dev_split` is approximately the validation share), which means a
/// long document's chunks may straddle both buckets.
pub fn ingest(
    input_dir: &Path,
    config: &PretrainConfig,
    tokenizer: &dyn CorpusTokenizer,
    rng: &mut StdRng,
) -> Result<IngestOutcome> {
    let vocab = tokenizer.vocab_size();
    if vocab >= usize::from(u16::MAX) {
        bail!("vocabulary size {vocab} does not fit u16 token storage (must be < {})", u16::MAX);
    }

    let cache = cache_dir(input_dir);
    if cache.exists() {
        tracing::info!(
            cache = %cache.display(),
            "cache already exists; remove the directory to regenerate"
        );
        return Ok(IngestOutcome::CacheExists);
    }

    let files = collect_text_files(input_dir)?;
    tracing::info!(files = files.len(), input = %input_dir.display(), "ingesting corpus");

    let specials = tokenizer.special_ids();
    let mut train_chunks: Vec<Vec<u32>> = Vec::new();
    let mut val_chunks: Vec<Vec<u32>> = Vec::new();

    for path in &files {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("open corpus file {}", path.display()))?,
        );
        for line in reader.lines() {
            let line = line.with_context(|| format!("read corpus file {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            // Each line is one document.
            let tokens = tokenizer.encode(&line)?;
            for chunk in split_into_chunks(&tokens, config.seqlen, &specials) {
                // One draw per chunk, not per document.
                if rng.gen::<f64>() > config.train_dev_split {
                    train_chunks.push(chunk);
                } else {
                    val_chunks.push(chunk);
                }
            }
        }
    }

    let staging = input_dir.join(STAGING_DIR);
    if staging.exists() {
        tracing::warn!(staging = %staging.display(), "removing stale staging directory");
        std::fs::remove_dir_all(&staging)
            .with_context(|| format!("remove stale staging directory {}", staging.display()))?;
    }
    std::fs::create_dir(&staging)
        .with_context(|| format!("create staging directory {}", staging.display()))?;

    let (num_train, num_val) = (train_chunks.len(), val_chunks.len());
    write_bucket(&staging.join(TRAIN_FILE), train_chunks, config.seqlen, rng)?;
    write_bucket(&staging.join(VAL_FILE), val_chunks, config.seqlen, rng)?;

    // Publish atomically: the sentinel appears only after both files are
    // durable.
    std::fs::rename(&staging, &cache)
        .with_context(|| format!("publish cache directory {}", cache.display()))?;

    tracing::info!(
        train_chunks = num_train,
        val_chunks = num_val,
        cache = %cache.display(),
        "cache written"
    );
    Ok(IngestOutcome::Written {
        train_chunks: num_train,
        val_chunks: num_val,
    })
}

/// All `*.txt` files directly under `input_dir`, sorted. Filesystem
/// enumeration order is not stable, so sorting keeps ingestion reproducible
/// for a fixed seed.
fn collect_text_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("read input directory {}", input_dir.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|e| e == "txt").unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

/// Shuffle one bucket and serialise it as dense u16-LE rows.
fn write_bucket(
    path: &Path,
    mut chunks: Vec<Vec<u32>>,
    seqlen: usize,
    rng: &mut StdRng,
) -> Result<()> {
    chunks.shuffle(rng);
    let file =
        File::create(path).with_context(|| format!("create cache file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for chunk in &chunks {
        // Wrong length here is a chunk-builder bug, not a user error.
        assert_eq!(chunk.len(), seqlen, "finalized chunk has wrong length");
        for &id in chunk {
            writer.write_all(&(id as u16).to_le_bytes())?;
        }
    }
    writer.flush()?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("sync cache file {}", path.display()))?;
    Ok(())
}
