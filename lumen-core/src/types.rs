use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
}

/// Static description of the model served by a pipeline.
///
/// Defaults describe Stable Diffusion XL base 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    /// Latent-space sample size of the noise oracle (`unet.config.sample_size`).
    pub default_sample_size: usize,
    /// Spatial downsampling between pixel and latent space.
    pub vae_scale_factor: usize,
    pub latent_channels: usize,
    /// Latents are divided by this before decoding.
    pub vae_scaling_factor: f32,
    /// The decoder overflows in half precision and must be upcast to decode.
    pub force_upcast: bool,
    /// Empty negative prompts map to all-zero embeddings.
    pub force_zeros_for_empty_prompt: bool,
    pub dtype: DType,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "stable-diffusion-xl-1024-v1-0".to_string(),
            default_sample_size: 128,
            vae_scale_factor: 8,
            latent_channels: 4,
            vae_scaling_factor: 0.13025,
            force_upcast: true,
            force_zeros_for_empty_prompt: true,
            dtype: DType::F16,
        }
    }
}

impl ModelConfig {
    /// Pixel resolution used when a request leaves width or height at zero.
    pub fn default_resolution(&self) -> usize {
        self.default_sample_size * self.vae_scale_factor
    }
}

/// (height, width) in pixels.
pub type SizeHw = (usize, usize);

/// Micro-conditioning forwarded to the noise oracle alongside the text
/// embeddings: original size, crop origin, and target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeConditioning {
    pub original_size: SizeHw,
    pub crops_coords_top_left: (usize, usize),
    pub target_size: SizeHw,
}

impl SizeConditioning {
    /// Flattened as `[orig_h, orig_w, crop_top, crop_left, target_h, target_w]`.
    pub fn time_ids(&self) -> [f32; 6] {
        [
            self.original_size.0 as f32,
            self.original_size.1 as f32,
            self.crops_coords_top_left.0 as f32,
            self.crops_coords_top_left.1 as f32,
            self.target_size.0 as f32,
            self.target_size.1 as f32,
        ]
    }
}
