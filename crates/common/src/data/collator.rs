//! Batch collation, with and without masking.
//!
//! Collation is a seam so the masking objective stays swappable:
//! [`MlmCollator`] applies BERT-style dynamic masking, [`PlainCollator`]
//! just tensorizes rows (e.g. for embedding extraction).

use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PretrainConfig;
use crate::tokenizer::{CorpusTokenizer, SpecialIds};

/// Label value at positions that do not participate in the loss.
pub const IGNORE_INDEX: i64 = -100;

/// One collated batch: `(batch, seqlen)` I64 tensors.
pub struct MlmBatch {
    pub input_ids: Tensor,
    /// Original ids at masked positions, [`IGNORE_INDEX`] elsewhere.
    /// `None` when the collator does not mask.
    pub labels: Option<Tensor>,
}

/// Turns fixed-length id rows into a model-ready batch.
pub trait Collate {
    fn collate(&mut self, rows: Vec<Vec<i64>>, device: &Device) -> Result<MlmBatch>;
}

fn rows_to_tensor(rows: &[Vec<i64>], device: &Device) -> Result<Tensor> {
    let batch = rows.len();
    let seqlen = rows[0].len();
    let flat: Vec<i64> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (batch, seqlen), device)?)
}

// ── PlainCollator ───────────────────────────────────────────────────────────

/// No masking, no labels.
pub struct PlainCollator;

impl Collate for PlainCollator {
    fn collate(&mut self, rows: Vec<Vec<i64>>, device: &Device) -> Result<MlmBatch> {
        if rows.is_empty() {
            bail!("cannot collate an empty batch");
        }
        Ok(MlmBatch {
            input_ids: rows_to_tensor(&rows, device)?,
            labels: None,
        })
    }
}

// ── MlmCollator ─────────────────────────────────────────────────────────────

/// BERT-style dynamic masking.
///
/// Each non-special position is selected with probability `mlm_prob`. A
/// selected position keeps its original id in the labels; in the inputs it
/// becomes the mask token 80% of the time, a uniformly random vocabulary id
/// 10% of the time, and stays unchanged the remaining 10%. Unselected
/// positions get [`IGNORE_INDEX`] labels. Masking is re-drawn every batch,
/// so repeated epochs see different corruptions of the same chunk.
pub struct MlmCollator {
    mlm_prob: f64,
    vocab_size: usize,
    specials: SpecialIds,
    rng: StdRng,
}

impl MlmCollator {
    pub fn new(mlm_prob: f64, vocab_size: usize, specials: SpecialIds, seed: u64) -> Self {
        Self {
            mlm_prob,
            vocab_size,
            specials,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Wire the collator from the pipeline config and tokenizer capability.
    pub fn from_config(config: &PretrainConfig, tokenizer: &dyn CorpusTokenizer) -> Self {
        Self::new(
            config.mlm_prob,
            tokenizer.vocab_size(),
            tokenizer.special_ids(),
            config.seed,
        )
    }
}

impl Collate for MlmCollator {
    fn collate(&mut self, mut rows: Vec<Vec<i64>>, device: &Device) -> Result<MlmBatch> {
        if rows.is_empty() {
            bail!("cannot collate an empty batch");
        }
        let mut labels: Vec<Vec<i64>> = Vec::with_capacity(rows.len());
        for row in &mut rows {
            let mut row_labels = vec![IGNORE_INDEX; row.len()];
            for (pos, id) in row.iter_mut().enumerate() {
                if self.specials.contains(*id as u32) {
                    continue;
                }
                if self.rng.gen::<f64>() >= self.mlm_prob {
                    continue;
                }
                row_labels[pos] = *id;
                let roll = self.rng.gen::<f64>();
                if roll < 0.8 {
                    *id = i64::from(self.specials.mask);
                } else if roll < 0.9 {
                    *id = i64::from(self.rng.gen_range(0..self.vocab_size as u32));
                }
                // else: keep the original id; the label still marks it.
            }
            labels.push(row_labels);
        }
        Ok(MlmBatch {
            input_ids: rows_to_tensor(&rows, device)?,
            labels: Some(rows_to_tensor(&labels, device)?),
        })
    }
}
