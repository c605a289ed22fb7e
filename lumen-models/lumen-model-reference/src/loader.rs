use lumen_core::{Backend, ModelConfig, Result};
use lumen_scheduler::{NoiseSchedule, SchedulerConfig};

use crate::{AnalyticDenoiser, HashConditioner, LinearLatentDecoder};

/// One replica of the reference model family.
pub struct ReferenceModel<B: Backend> {
    pub conditioner: HashConditioner<B>,
    pub denoiser: AnalyticDenoiser<B>,
    pub decoder: LinearLatentDecoder<B>,
}

pub fn load_reference_model<B: Backend>(
    backend: B,
    model: &ModelConfig,
    scheduler: &SchedulerConfig,
    watermark: bool,
) -> Result<ReferenceModel<B>> {
    let schedule = NoiseSchedule::new(scheduler)?;
    Ok(ReferenceModel {
        conditioner: HashConditioner::new(backend.clone(), model.force_zeros_for_empty_prompt),
        denoiser: AnalyticDenoiser::new(backend.clone(), schedule, model.latent_channels),
        decoder: LinearLatentDecoder::new(
            backend,
            model.vae_scale_factor,
            model.vae_scaling_factor,
            model.dtype,
            model.force_upcast,
        )
        .with_watermark(watermark),
    })
}
