//! Learning-rate schedule: linear warmup, then decay.

/// Decay mode after warmup. [`LrDecay::Linear`] to zero is the default for
/// MLM pretraining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LrDecay {
    Linear,
    Cosine,
    None,
}

impl LrDecay {
    pub fn from_str(s: &str) -> Self {
        match s {
            "cosine" => Self::Cosine,
            "none" => Self::None,
            _ => Self::Linear,
        }
    }
}

/// Warmup → decay schedule over a fixed number of training steps.
#[derive(Clone)]
pub struct LrScheduler {
    step: usize,
    lr: f64,
    warmup_steps: usize,
    training_steps: usize,
    decay: LrDecay,
}

impl LrScheduler {
    pub fn new(lr: f64, warmup_steps: usize, training_steps: usize, decay: LrDecay) -> Self {
        Self {
            step: 0,
            lr,
            warmup_steps,
            training_steps,
            decay,
        }
    }

    /// Learning rate at the current step.
    pub fn current_lr(&self) -> f64 {
        if self.warmup_steps > 0 && self.step < self.warmup_steps {
            return self.lr * (self.step as f64 + 1.0) / self.warmup_steps as f64;
        }
        if self.training_steps == 0 {
            return self.lr;
        }
        let step = self.step.min(self.training_steps);
        let decay_steps = (self.training_steps - self.warmup_steps).max(1);
        let progress = (step - self.warmup_steps) as f64 / decay_steps as f64;
        match self.decay {
            LrDecay::Linear => self.lr * (1.0 - progress),
            LrDecay::Cosine => {
                0.5 * self.lr * (1.0 + (std::f64::consts::PI * progress).cos())
            }
            LrDecay::None => self.lr,
        }
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
