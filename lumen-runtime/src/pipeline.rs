use lumen_core::{Backend, LatentDecoder, ModelConfig, NoiseOracle, TextConditioner};
use lumen_scheduler::SchedulerConfig;

/// One replica of the model stack: a backend plus the three oracles, and
/// the configs the loop needs to drive them.
///
/// A session takes exclusive ownership of a replica for its duration, so
/// precision changes on the decoder never leak across sessions.
pub struct Pipeline<B: Backend> {
    pub backend: B,
    pub model: ModelConfig,
    pub scheduler: SchedulerConfig,
    pub conditioner: Box<dyn TextConditioner<T = B::Tensor>>,
    pub denoiser: Box<dyn NoiseOracle<T = B::Tensor>>,
    pub decoder: Box<dyn LatentDecoder<T = B::Tensor>>,
}

impl<B: Backend> Pipeline<B> {
    pub fn new(
        backend: B,
        model: ModelConfig,
        scheduler: SchedulerConfig,
        conditioner: Box<dyn TextConditioner<T = B::Tensor>>,
        denoiser: Box<dyn NoiseOracle<T = B::Tensor>>,
        decoder: Box<dyn LatentDecoder<T = B::Tensor>>,
    ) -> Self {
        Self {
            backend,
            model,
            scheduler,
            conditioner,
            denoiser,
            decoder,
        }
    }
}
