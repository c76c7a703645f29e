//! # mlm-train — Training Orchestration
//!
//! The thin loop around an external masked-LM model:
//!
//! * **[`MaskedLmModel`]** — the model capability: `compute_loss` for the
//!   training/validation path, `embed` for representation extraction.
//! * **[`Pretrainer`]** — owns variables + AdamW (decay / no-decay groups)
//!   + schedule; one call to [`Pretrainer::step`] runs forward, backward,
//!   optimiser step, and schedule advance over accumulated micro-batches.
//! * **[`LrScheduler`]** — linear warmup → linear / cosine / constant.
//! * **[`AllReduce`]** — cross-worker validation averaging seam.

pub mod model;
pub mod scheduler;
pub mod trainer;

pub use model::{padding_mask, AllReduce, MaskedLmModel, SingleProcess};
pub use scheduler::{LrDecay, LrScheduler};
pub use trainer::{Pretrainer, StepMetrics, TrainerConfig};
