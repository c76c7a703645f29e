//! Pretrainer: the optimisation loop around an external masked-LM model.
//!
//! Owns the variables, the AdamW optimisers (split into decay / no-decay
//! parameter groups), and the learning-rate schedule. One call to
//! [`Pretrainer::step`] consumes the micro-batches of one optimiser step:
//! forward + loss per micro-batch, one backward over the accumulated loss,
//! optimiser step, schedule advance.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

use mlm_common::MlmBatch;

use crate::model::{padding_mask, AllReduce, MaskedLmModel};
use crate::scheduler::{LrDecay, LrScheduler};

// ── Config ──────────────────────────────────────────────────────────────────

/// Optimisation hyper-parameters.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub batch_size: usize,
    pub grad_accum: usize,
    pub training_steps: usize,
    pub warmup_steps: usize,
    pub learning_rate: f64,
    pub adam_epsilon: f64,
    pub weight_decay: f64,
    pub lr_decay: LrDecay,
    /// Loader worker threads; 0 = load synchronously on the training thread.
    pub num_workers: usize,
    pub log_every: usize,
    pub eval_every: usize,
    pub save_every: usize,
    pub save_dir: PathBuf,
    pub run_name: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            grad_accum: 1,
            training_steps: 10_000,
            warmup_steps: 1000,
            learning_rate: 1e-5,
            adam_epsilon: 1e-6,
            weight_decay: 0.01,
            lr_decay: LrDecay::Linear,
            num_workers: 0,
            log_every: 25,
            eval_every: 500,
            save_every: 1000,
            save_dir: PathBuf::from("runs"),
            run_name: "pretrain".to_string(),
        }
    }
}

/// Metrics returned after each training step.
#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub step: usize,
    pub loss: f32,
    pub lr: f64,
}

// ── Pretrainer ──────────────────────────────────────────────────────────────

/// Parameters whose names match the no-decay list (biases and norm scales)
/// are optimised without weight decay.
fn no_decay_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("bias") || name.contains("norm")
}

/// The training engine. Generic over the external model.
pub struct Pretrainer<M: MaskedLmModel> {
    model: M,
    varmap: VarMap,
    decay_opt: Option<AdamW>,
    no_decay_opt: Option<AdamW>,
    scheduler: LrScheduler,
    pub config: TrainerConfig,
    pub global_step: usize,
    pad_id: u32,
}

impl<M: MaskedLmModel> Pretrainer<M> {
    /// Construct a trainer around an already-built model and the `VarMap`
    /// holding its trainable variables.
    pub fn new(model: M, varmap: VarMap, config: TrainerConfig, pad_id: u32) -> Result<Self> {
        let mut decay_vars: Vec<Var> = Vec::new();
        let mut no_decay_vars: Vec<Var> = Vec::new();
        for (name, var) in varmap.data().lock().unwrap().iter() {
            if no_decay_param(name) {
                no_decay_vars.push(var.clone());
            } else {
                decay_vars.push(var.clone());
            }
        }
        if decay_vars.is_empty() && no_decay_vars.is_empty() {
            bail!("model has no trainable variables");
        }

        let make_opt = |vars: Vec<Var>, weight_decay: f64| -> Result<Option<AdamW>> {
            if vars.is_empty() {
                return Ok(None);
            }
            let opt = AdamW::new(
                vars,
                ParamsAdamW {
                    lr: config.learning_rate,
                    eps: config.adam_epsilon,
                    weight_decay,
                    ..Default::default()
                },
            )?;
            Ok(Some(opt))
        };
        let decay_opt = make_opt(decay_vars, config.weight_decay)?;
        let no_decay_opt = make_opt(no_decay_vars, 0.0)?;

        let scheduler = LrScheduler::new(
            config.learning_rate,
            config.warmup_steps,
            config.training_steps,
            config.lr_decay,
        );

        Ok(Self {
            model,
            varmap,
            decay_opt,
            no_decay_opt,
            scheduler,
            config,
            global_step: 0,
            pad_id,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// One optimiser step over the given micro-batches.
    pub fn step(&mut self, batches: &[MlmBatch]) -> Result<StepMetrics> {
        if batches.is_empty() {
            bail!("training step received no batches");
        }
        let n = batches.len();
        let lr = self.scheduler.current_lr();
        if let Some(opt) = &mut self.decay_opt {
            opt.set_learning_rate(lr);
        }
        if let Some(opt) = &mut self.no_decay_opt {
            opt.set_learning_rate(lr);
        }

        let mut total_loss: Option<Tensor> = None;
        let mut loss_sum = 0.0f32;
        for batch in batches {
            let labels = batch
                .labels
                .as_ref()
                .context("training batch has no labels; use a masking collator")?;
            let attention_mask = padding_mask(&batch.input_ids, self.pad_id)?;
            let loss = self
                .model
                .compute_loss(&batch.input_ids, &attention_mask, labels)?;
            loss_sum += loss.to_scalar::<f32>()?;
            let scaled = loss.affine(1.0 / n as f64, 0.0)?;
            total_loss = Some(match total_loss {
                None => scaled,
                Some(prev) => (prev + scaled)?,
            });
        }
        let total_loss = total_loss.unwrap();

        let grads = total_loss.backward()?;
        if let Some(opt) = &mut self.decay_opt {
            opt.step(&grads)?;
        }
        if let Some(opt) = &mut self.no_decay_opt {
            opt.step(&grads)?;
        }

        self.scheduler.advance();
        self.global_step += 1;

        Ok(StepMetrics {
            step: self.global_step - 1,
            loss: loss_sum / n as f32,
            lr,
        })
    }

    /// Average validation loss over `batches`, then across workers.
    ///
    /// Returns `f64::MAX` when there are no batches so a miswired validation
    /// set surfaces as an unmistakable number rather than an abort mid-run.
    pub fn validate<I>(&self, batches: I, reduce: &dyn AllReduce) -> Result<f64>
    where
        I: IntoIterator<Item = Result<MlmBatch>>,
    {
        let mut loss_sum = 0.0f64;
        let mut count = 0usize;
        for batch in batches {
            let batch = batch?;
            let labels = batch
                .labels
                .as_ref()
                .context("validation batch has no labels; use a masking collator")?;
            let attention_mask = padding_mask(&batch.input_ids, self.pad_id)?;
            let loss = self
                .model
                .compute_loss(&batch.input_ids, &attention_mask, labels)?;
            loss_sum += f64::from(loss.to_scalar::<f32>()?);
            count += 1;
        }
        if count == 0 {
            return Ok(f64::MAX);
        }
        reduce.mean_across_workers(loss_sum / count as f64)
    }

    /// Save the variables under `save_dir/run_name/checkpoint-<step>.safetensors`.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        let dir = self.config.save_dir.join(&self.config.run_name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create checkpoint directory {}", dir.display()))?;
        let path = dir.join(format!("checkpoint-{}.safetensors", self.global_step));
        self.varmap.save(&path)?;
        tracing::info!(path = %path.display(), step = self.global_step, "checkpoint saved");
        Ok(path)
    }

    /// Resume variables from an earlier checkpoint.
    pub fn load_checkpoint(&mut self, path: &std::path::Path) -> Result<()> {
        self.varmap
            .load(path)
            .with_context(|| format!("load checkpoint {}", path.display()))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SingleProcess;
    use candle_core::{DType, Device, Result as CandleResult};
    use candle_nn::{Init, VarBuilder};
    use mlm_common::IGNORE_INDEX;

    /// One scalar weight; loss = (w · mean(input ⊙ mask) − 1)².
    struct ToyMlm {
        w: Tensor,
    }

    impl MaskedLmModel for ToyMlm {
        fn compute_loss(
            &self,
            input_ids: &Tensor,
            attention_mask: &Tensor,
            _labels: &Tensor,
        ) -> CandleResult<Tensor> {
            let x = input_ids
                .to_dtype(DType::F32)?
                .mul(&attention_mask.to_dtype(DType::F32)?)?
                .mean_all()?;
            self.w.broadcast_mul(&x)?.affine(1.0, -1.0)?.sqr()
        }

        fn embed(&self, input_ids: &Tensor, _attention_mask: &Tensor) -> CandleResult<Tensor> {
            input_ids.to_dtype(DType::F32)
        }
    }

    const PAD: u32 = 2;

    fn toy_trainer(config: TrainerConfig) -> Pretrainer<ToyMlm> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let w = vb.get_with_hints((), "w", Init::Const(0.0)).unwrap();
        Pretrainer::new(ToyMlm { w }, varmap, config, PAD).unwrap()
    }

    fn toy_batch() -> MlmBatch {
        let device = Device::Cpu;
        let input_ids =
            Tensor::from_vec(vec![0i64, 10, 11, 2], (1, 4), &device).unwrap();
        let labels = Tensor::from_vec(
            vec![IGNORE_INDEX, 10, IGNORE_INDEX, IGNORE_INDEX],
            (1, 4),
            &device,
        )
        .unwrap();
        MlmBatch {
            input_ids,
            labels: Some(labels),
        }
    }

    #[test]
    fn step_reports_loss_and_warmup_lr() {
        let config = TrainerConfig {
            learning_rate: 1e-2,
            warmup_steps: 10,
            training_steps: 100,
            ..Default::default()
        };
        let mut trainer = toy_trainer(config);
        let metrics = trainer.step(&[toy_batch()]).unwrap();
        // w = 0 ⇒ loss = (0 − 1)² = 1 exactly.
        assert!((metrics.loss - 1.0).abs() < 1e-6);
        assert!((metrics.lr - 1e-3).abs() < 1e-12);
        assert_eq!(metrics.step, 0);
        assert_eq!(trainer.global_step, 1);
    }

    #[test]
    fn optimizer_actually_moves_the_weights() {
        let config = TrainerConfig {
            learning_rate: 1e-1,
            warmup_steps: 0,
            training_steps: 0,
            ..Default::default()
        };
        let mut trainer = toy_trainer(config);
        let first = trainer.step(&[toy_batch()]).unwrap().loss;
        for _ in 0..50 {
            trainer.step(&[toy_batch()]).unwrap();
        }
        let later = trainer.step(&[toy_batch()]).unwrap().loss;
        assert!(later < first, "loss should fall: {later} !< {first}");
    }

    #[test]
    fn accumulated_micro_batches_average_the_loss() {
        let mut trainer = toy_trainer(TrainerConfig::default());
        let metrics = trainer.step(&[toy_batch(), toy_batch()]).unwrap();
        assert!((metrics.loss - 1.0).abs() < 1e-6);
        assert_eq!(trainer.global_step, 1);
    }

    #[test]
    fn unlabeled_batch_is_rejected() {
        let mut trainer = toy_trainer(TrainerConfig::default());
        let batch = MlmBatch {
            input_ids: toy_batch().input_ids,
            labels: None,
        };
        assert!(trainer.step(&[batch]).is_err());
    }

    #[test]
    fn empty_step_is_rejected() {
        let mut trainer = toy_trainer(TrainerConfig::default());
        assert!(trainer.step(&[]).is_err());
    }

    #[test]
    fn validate_averages_batches() {
        let trainer = toy_trainer(TrainerConfig::default());
        let batches = vec![Ok(toy_batch()), Ok(toy_batch())];
        let avg = trainer.validate(batches, &SingleProcess).unwrap();
        assert!((avg - 1.0).abs() < 1e-6);
    }

    #[test]
    fn validate_with_no_batches_is_sentinel() {
        let trainer = toy_trainer(TrainerConfig::default());
        let avg = trainer.validate(Vec::new(), &SingleProcess).unwrap();
        assert_eq!(avg, f64::MAX);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainerConfig {
            save_dir: dir.path().to_path_buf(),
            run_name: "test".to_string(),
            ..Default::default()
        };
        let mut trainer = toy_trainer(config);
        trainer.step(&[toy_batch()]).unwrap();
        let path = trainer.save_checkpoint().unwrap();
        assert!(path.exists());
        trainer.load_checkpoint(&path).unwrap();
    }

    #[test]
    fn bias_and_norm_parameters_skip_weight_decay() {
        assert!(no_decay_param("encoder.layer.0.attention.bias"));
        assert!(no_decay_param("encoder.LayerNorm.weight"));
        assert!(no_decay_param("final_norm.weight"));
        assert!(!no_decay_param("encoder.layer.0.attention.query.weight"));
    }
}
