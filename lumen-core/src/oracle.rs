//! Contracts for the numeric collaborators driven by the denoising loop.
//!
//! Text encoders, noise predictors, and latent decoders are black boxes to
//! the loop. Each is a trait object over the backend's tensor type so that
//! real models and test doubles plug in the same way.

use crate::tensor::Tensor;
use crate::{DType, Result};

/// Output of [`TextConditioner::encode`]. Every tensor has
/// `batch_size * samples` rows, prompt-major (all samples of prompt 0 first).
#[derive(Debug, Clone)]
pub struct Conditioning<T: Tensor> {
    /// `[rows, seq_len, hidden]`.
    pub prompt_embeds: T,
    pub negative_prompt_embeds: T,
    /// `[rows, pooled_dim]`.
    pub pooled_prompt_embeds: T,
    pub negative_pooled_prompt_embeds: T,
}

pub trait TextConditioner: Send + Sync {
    type T: Tensor;

    /// Encode positive and negative prompts. `negative` is empty, has one
    /// entry (broadcast), or one entry per positive prompt.
    fn encode(
        &self,
        positive: &[String],
        negative: &[String],
        samples: usize,
    ) -> Result<Conditioning<Self::T>>;
}

/// One noise-prediction call.
pub struct NoiseInput<'a, T: Tensor> {
    /// Scaled model input, `[rows, channels, h, w]`.
    pub latents: &'a T,
    pub timestep: f64,
    /// `[rows, seq_len, hidden]`.
    pub encoder_hidden_states: &'a T,
    /// Pooled text embeddings, `[rows, pooled_dim]`.
    pub text_embeds: &'a T,
    /// Size micro-conditioning, `[rows, 6]`.
    pub time_ids: &'a T,
}

pub trait NoiseOracle: Send + Sync {
    type T: Tensor;

    /// Predict the noise residual; output has the shape of `input.latents`.
    fn predict(&self, input: &NoiseInput<'_, Self::T>) -> Result<Self::T>;
}

/// Turns latents into images in `[-1, 1]` with shape `[rows, 3, H, W]`.
///
/// Decoders may hold a precision mode that is shared by every caller of the
/// same instance; changing it requires exclusive access.
pub trait LatentDecoder: Send + Sync {
    type T: Tensor;

    fn dtype(&self) -> DType;

    /// Switch the decoder's working precision.
    fn set_dtype(&mut self, dtype: DType) -> Result<()>;

    /// Whether half-precision decoding overflows and must be upcast.
    fn force_upcast(&self) -> bool;

    fn needs_upcasting(&self) -> bool {
        self.dtype() == DType::F16 && self.force_upcast()
    }

    /// `latents` are already divided by the model's scaling factor.
    fn decode(&self, latents: &Self::T) -> Result<Self::T>;

    /// Apply a visible provenance mark to decoded images. The default
    /// decoder has none.
    fn apply_watermark(&self, images: Self::T) -> Result<Self::T> {
        Ok(images)
    }
}
