//! Tokenizer capability seam.
//!
//! The pipeline never talks to a concrete tokenizer directly; it goes through
//! [`CorpusTokenizer`], which is the minimal contract ingestion and the MLM
//! collator need: a vocabulary bound, an encode call, and the four reserved
//! special-token ids. [`HfTokenizer`] is the production implementation,
//! wrapping a Hugging Face `tokenizer.json`.

use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer;

use crate::config::PretrainConfig;

/// Ids of the reserved special tokens, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    /// Begin-of-sequence marker; first element of every chunk.
    pub bos: u32,
    /// End-of-sequence marker; last element of every chunk.
    pub eos: u32,
    /// Right-padding filler for short chunks.
    pub pad: u32,
    /// Replacement token used by the MLM collator.
    pub mask: u32,
}

impl SpecialIds {
    /// Whether `id` is one of the reserved ids. Such positions are never
    /// selected for masking.
    pub fn contains(&self, id: u32) -> bool {
        id == self.bos || id == self.eos || id == self.pad || id == self.mask
    }
}

/// What ingestion and collation require from the external tokenizer.
pub trait CorpusTokenizer {
    /// Total vocabulary size, special tokens included.
    fn vocab_size(&self) -> usize;
    /// The reserved special-token ids.
    fn special_ids(&self) -> SpecialIds;
    /// Encode one document into token ids, without adding special tokens
    /// (the chunk builder places its own markers).
    fn encode(&self, text: &str) -> Result<Vec<u32>>;
}

/// A Hugging Face `tokenizer.json` behind the [`CorpusTokenizer`] contract.
pub struct HfTokenizer {
    inner: Tokenizer,
    specials: SpecialIds,
}

impl HfTokenizer {
    /// Load a tokenizer file and resolve the special-token ids named in
    /// `config`. A vocabulary missing any of the four reserved tokens is a
    /// fatal configuration error.
    pub fn from_file(path: &Path, config: &PretrainConfig) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("load tokenizer {}: {e}", path.display()))?;
        let resolve = |token: &str| {
            inner
                .token_to_id(token)
                .ok_or_else(|| anyhow!("tokenizer has no {token:?} token"))
        };
        let specials = SpecialIds {
            bos: resolve(&config.bos_token)?,
            eos: resolve(&config.eos_token)?,
            pad: resolve(&config.pad_token)?,
            mask: resolve(&config.mask_token)?,
        };
        Ok(Self { inner, specials })
    }
}

impl CorpusTokenizer for HfTokenizer {
    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn special_ids(&self) -> SpecialIds {
        self.specials
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }
}
