use lumen_core::{Backend, LumenError, NoiseInput, NoiseOracle, Result, Tensor};
use lumen_scheduler::NoiseSchedule;

/// Predicts the exact noise that separates the input from a smooth target
/// field derived from the pooled text embedding.
///
/// The model input is read in variance-preserving form,
/// `x = sqrt(acp) * target + sqrt(1 - acp) * eps`, which is what every
/// scheduler hands the model after `scale_model_input`. Solving for `eps`
/// makes every sampler converge on the target.
pub struct AnalyticDenoiser<B: Backend> {
    backend: B,
    schedule: NoiseSchedule,
    latent_channels: usize,
}

impl<B: Backend> AnalyticDenoiser<B> {
    pub fn new(backend: B, schedule: NoiseSchedule, latent_channels: usize) -> Self {
        Self {
            backend,
            schedule,
            latent_channels,
        }
    }

    /// Target latent field for one batch row, `[channels, h, w]` flattened.
    pub fn target(&self, pooled: &[f32], h: usize, w: usize) -> Vec<f32> {
        let d = pooled.len().max(1);
        let at = |i: usize| pooled.get(i % d).copied().unwrap_or(0.0);
        let mut out = Vec::with_capacity(self.latent_channels * h * w);
        for c in 0..self.latent_channels {
            let amplitude = at(c);
            let fx = 0.2 + 0.3 * at(c + 1).abs();
            let fy = 0.2 + 0.3 * at(c + 2).abs();
            let phase = std::f32::consts::PI * at(c + 3);
            for y in 0..h {
                for x in 0..w {
                    out.push(amplitude * (fx * x as f32 + fy * y as f32 + phase).sin());
                }
            }
        }
        out
    }
}

fn check_rows(name: &str, shape: &[usize], rows: usize) -> Result<()> {
    if shape.first().copied() != Some(rows) {
        return Err(LumenError::Oracle(format!(
            "{name} must have {rows} rows, got shape {shape:?}"
        )));
    }
    Ok(())
}

impl<B: Backend> NoiseOracle for AnalyticDenoiser<B> {
    type T = B::Tensor;

    fn predict(&self, input: &NoiseInput<'_, B::Tensor>) -> Result<B::Tensor> {
        let shape = input.latents.shape().to_vec();
        let [rows, channels, h, w] = shape[..] else {
            return Err(LumenError::Oracle(format!(
                "latents must be [rows, channels, h, w], got {shape:?}"
            )));
        };
        if rows == 0 || h == 0 || w == 0 {
            return Err(LumenError::Oracle(format!("empty latents {shape:?}")));
        }
        if channels != self.latent_channels {
            return Err(LumenError::Oracle(format!(
                "expected {} latent channels, got {channels}",
                self.latent_channels
            )));
        }
        check_rows("encoder_hidden_states", input.encoder_hidden_states.shape(), rows)?;
        check_rows("text_embeds", input.text_embeds.shape(), rows)?;
        check_rows("time_ids", input.time_ids.shape(), rows)?;
        if input.time_ids.numel() != rows * 6 {
            return Err(LumenError::Oracle(format!(
                "time_ids must be [rows, 6], got {:?}",
                input.time_ids.shape()
            )));
        }

        let acp = self.schedule.alpha_cumprod_at(input.timestep);
        let signal = acp.sqrt() as f32;
        let noise = (1.0 - acp).sqrt() as f32;
        if noise <= 0.0 {
            return Err(LumenError::Oracle(format!(
                "timestep {} has no noise",
                input.timestep
            )));
        }

        let latents = self.backend.copy_to_host_f32(input.latents)?;
        let pooled = self.backend.copy_to_host_f32(input.text_embeds)?;
        let pooled_dim = pooled.len() / rows;
        let per_row = channels * h * w;

        let mut eps = Vec::with_capacity(latents.len());
        for (r, row) in latents.chunks(per_row).enumerate() {
            let target = self.target(&pooled[r * pooled_dim..(r + 1) * pooled_dim], h, w);
            eps.extend(row.iter().zip(&target).map(|(x, t)| (x - signal * t) / noise));
        }
        if eps.iter().any(|v| !v.is_finite()) {
            return Err(LumenError::Oracle("non-finite noise prediction".into()));
        }
        self.backend.copy_from_host_f32(&eps, &shape)
    }
}
