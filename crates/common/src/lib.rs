//! # mlm-common — Shared Primitives
//!
//! Configuration and the whole data pipeline for masked-LM pretraining:
//!
//! * **[`PretrainConfig`]** — pipeline knobs (serialised as JSON).
//! * **[`CorpusTokenizer`]** / **[`HfTokenizer`]** — the external-tokenizer
//!   capability seam and its Hugging Face implementation.
//! * **[`split_into_chunks`]** — one document → fixed-length id chunks.
//! * **[`ingest`]** — raw `*.txt` corpus → `cache/train.bin` + `cache/val.bin`.
//! * **[`MmapTextDataset`]** — lazily mapped random access over a cache file.
//! * **[`DataLoader`]** / **[`MlmCollator`]** — shuffled, optionally sharded
//!   batching with dynamic masking.

pub mod config;
pub mod data;
pub mod tokenizer;

pub use config::PretrainConfig;
pub use data::chunker::split_into_chunks;
pub use data::collator::{Collate, MlmBatch, MlmCollator, PlainCollator, IGNORE_INDEX};
pub use data::ingest::{cache_dir, ingest, IngestOutcome, TRAIN_FILE, VAL_FILE};
pub use data::loader::{spawn_prefetch, DataLoader, PrefetchHandle, WorkerShard};
pub use data::mmap::MmapTextDataset;
pub use tokenizer::{CorpusTokenizer, HfTokenizer, SpecialIds};
