//! The external-model capability seam.
//!
//! The network itself lives outside this workspace; the trainer only needs
//! the two operations below. They are deliberately separate entry points —
//! the loss path and the representation path take different arguments and
//! return different things, so neither branches on an optional label.

use candle_core::{DType, Result, Tensor};

/// What the trainer requires of a masked-LM model.
///
/// Mask convention: 1 = real token, 0 = pad.
pub trait MaskedLmModel {
    /// Scalar masked-LM loss over one batch. `labels` carry the original id
    /// at masked positions and `-100` elsewhere.
    fn compute_loss(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        labels: &Tensor,
    ) -> Result<Tensor>;

    /// Hidden states for one batch, no loss head involved.
    fn embed(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor>;
}

/// Attention mask from a `(batch, seqlen)` id tensor: 1 where the id is not
/// the pad id.
pub fn padding_mask(input_ids: &Tensor, pad_id: u32) -> Result<Tensor> {
    input_ids.ne(i64::from(pad_id))?.to_dtype(DType::U32)
}

// ── Cross-worker reduction seam ─────────────────────────────────────────────

/// Averages a validation statistic across training workers. Multi-process
/// synchronization is an external concern; the trainer only asks for the
/// sum-then-divide-by-world-size result.
pub trait AllReduce {
    fn mean_across_workers(&self, value: f64) -> anyhow::Result<f64>;
}

/// Identity reduction for single-process runs.
pub struct SingleProcess;

impl AllReduce for SingleProcess {
    fn mean_across_workers(&self, value: f64) -> anyhow::Result<f64> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn padding_mask_marks_pad_positions_zero() {
        let device = Device::Cpu;
        let input =
            Tensor::from_vec(vec![0i64, 10, 11, 2, 2, 1], (1, 6), &device).unwrap();
        let mask = padding_mask(&input, 2).unwrap();
        assert_eq!(mask.to_vec2::<u32>().unwrap(), vec![vec![1, 1, 1, 0, 0, 1]]);
    }

    #[test]
    fn single_process_reduction_is_identity() {
        assert_eq!(SingleProcess.mean_across_workers(2.5).unwrap(), 2.5);
    }
}
