//! Classifier-free guidance.

use lumen_core::{Backend, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceCombiner {
    pub scale: f32,
    /// Blend toward a std-matched estimate; 0 disables.
    pub rescale: f32,
}

impl GuidanceCombiner {
    pub fn new(scale: f32, rescale: f32) -> Self {
        Self { scale, rescale }
    }

    /// `uncond + scale * (cond - uncond)`, optionally rescaled so each row's
    /// standard deviation moves toward that of `cond`.
    pub fn combine<B: Backend>(
        &self,
        backend: &B,
        uncond: &B::Tensor,
        cond: &B::Tensor,
    ) -> Result<B::Tensor> {
        let combined = backend.axpby(1.0 - self.scale, uncond, self.scale, cond)?;
        if self.rescale <= 0.0 {
            return Ok(combined);
        }
        self.rescale_noise(backend, &combined, cond)
    }

    fn rescale_noise<B: Backend>(
        &self,
        backend: &B,
        combined: &B::Tensor,
        cond: &B::Tensor,
    ) -> Result<B::Tensor> {
        let std_text = backend.row_std(cond)?;
        let std_cfg = backend.row_std(combined)?;
        let factors: Vec<f32> = std_text
            .iter()
            .zip(&std_cfg)
            .map(|(&t, &c)| if c > 0.0 { t / c } else { 1.0 })
            .collect();
        let rescaled = backend.mul_rows(combined, &factors)?;
        backend.axpby(self.rescale, &rescaled, 1.0 - self.rescale, combined)
    }
}
