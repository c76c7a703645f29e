//! Pipeline configuration.
//!
//! Serialised as JSON so an ingestion run can be reproduced from the file it
//! leaves behind. Every field has a default, so a minimal `{}` JSON produces
//! a working configuration.

use serde::{Deserialize, Serialize};

/// Knobs shared by ingestion and the data loaders.
///
/// Backwards-compatible: missing fields fall back to their
/// `#[serde(default)]` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainConfig {
    /// Chunk length in tokens. Every training example has exactly this many.
    #[serde(default = "default_seqlen")]
    pub seqlen: usize,
    /// Approximate validation share: each chunk goes to validation when a
    /// uniform draw is <= this value.
    #[serde(default = "default_split")]
    pub train_dev_split: f64,
    /// Probability that a token position is selected for masking.
    #[serde(default = "default_mlm_prob")]
    pub mlm_prob: f64,
    /// Seed for the single explicit RNG threaded through ingestion and the
    /// loaders.
    #[serde(default = "default_seed")]
    pub seed: u64,

    // ── Special token surface forms ─────────────────────────────────────────
    /// Begin-of-sequence token as it appears in the tokenizer vocabulary.
    #[serde(default = "default_bos")]
    pub bos_token: String,
    /// End-of-sequence token.
    #[serde(default = "default_eos")]
    pub eos_token: String,
    /// Padding token.
    #[serde(default = "default_pad")]
    pub pad_token: String,
    /// Mask token used by the MLM collator.
    #[serde(default = "default_mask")]
    pub mask_token: String,
}

// ── Default value functions ─────────────────────────────────────────────────

fn default_seqlen() -> usize {
    512
}
fn default_split() -> f64 {
    0.05
}
fn default_mlm_prob() -> f64 {
    0.15
}
fn default_seed() -> u64 {
    3
}
fn default_bos() -> String {
    "<s>".to_string()
}
fn default_eos() -> String {
    "</s>".to_string()
}
fn default_pad() -> String {
    "<pad>".to_string()
}
fn default_mask() -> String {
    "<mask>".to_string()
}

// ── Impl ────────────────────────────────────────────────────────────────────

impl Default for PretrainConfig {
    fn default() -> Self {
        Self {
            seqlen: default_seqlen(),
            train_dev_split: default_split(),
            mlm_prob: default_mlm_prob(),
            seed: default_seed(),
            bos_token: default_bos(),
            eos_token: default_eos(),
            pad_token: default_pad(),
            mask_token: default_mask(),
        }
    }
}

impl PretrainConfig {
    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_round_trip() {
        let config = PretrainConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: PretrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.seqlen, loaded.seqlen);
        assert_eq!(config.train_dev_split, loaded.train_dev_split);
        assert_eq!(config.mlm_prob, loaded.mlm_prob);
        assert_eq!(config.seed, loaded.seed);
        assert_eq!(config.mask_token, loaded.mask_token);
    }

    #[test]
    fn empty_json_produces_defaults() {
        let loaded: PretrainConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded.seqlen, 512);
        assert_eq!(loaded.train_dev_split, 0.05);
        assert_eq!(loaded.mlm_prob, 0.15);
        assert_eq!(loaded.bos_token, "<s>");
        assert_eq!(loaded.pad_token, "<pad>");
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let loaded: PretrainConfig =
            serde_json::from_str(r#"{"seqlen": 128, "mask_token": "[MASK]"}"#).unwrap();
        assert_eq!(loaded.seqlen, 128);
        assert_eq!(loaded.mask_token, "[MASK]");
        assert_eq!(loaded.seed, 3);
        assert_eq!(loaded.eos_token, "</s>");
    }
}
