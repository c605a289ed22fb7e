use lumen_core::{LumenError, ModelConfig, Result};
use serde::Deserialize;

/// `vae/config.json`.
#[derive(Debug, Deserialize)]
pub struct VaeConfig {
    #[serde(default = "default_block_out_channels")]
    pub block_out_channels: Vec<usize>,
    #[serde(default = "default_latent_channels")]
    pub latent_channels: usize,
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f32,
    #[serde(default = "default_true")]
    pub force_upcast: bool,
}

/// `unet/config.json`. Only the fields that shape latents are read.
#[derive(Debug, Deserialize)]
pub struct UnetConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_latent_channels")]
    pub in_channels: usize,
}

/// `model_index.json`.
#[derive(Debug, Default, Deserialize)]
pub struct ModelIndex {
    #[serde(rename = "_name_or_path", default)]
    pub name_or_path: Option<String>,
    #[serde(default = "default_true")]
    pub force_zeros_for_empty_prompt: bool,
}

fn default_block_out_channels() -> Vec<usize> {
    vec![128, 256, 512, 512]
}
fn default_latent_channels() -> usize {
    4
}
fn default_scaling_factor() -> f32 {
    0.13025
}
fn default_sample_size() -> usize {
    128
}
fn default_true() -> bool {
    true
}

impl VaeConfig {
    /// Each decoder block past the first doubles the resolution.
    pub fn scale_factor(&self) -> usize {
        1 << self.block_out_channels.len().saturating_sub(1)
    }
}

/// Combine the component configs into a [`ModelConfig`].
pub fn to_model_config(
    name: String,
    index: &ModelIndex,
    unet: &UnetConfig,
    vae: &VaeConfig,
) -> Result<ModelConfig> {
    if unet.in_channels != vae.latent_channels {
        return Err(LumenError::ModelConfig(format!(
            "unet expects {} latent channels, vae produces {}",
            unet.in_channels, vae.latent_channels
        )));
    }
    if !(vae.scaling_factor.is_finite() && vae.scaling_factor > 0.0) {
        return Err(LumenError::ModelConfig(format!(
            "invalid vae scaling factor {}",
            vae.scaling_factor
        )));
    }
    Ok(ModelConfig {
        name,
        default_sample_size: unet.sample_size,
        vae_scale_factor: vae.scale_factor(),
        latent_channels: vae.latent_channels,
        vae_scaling_factor: vae.scaling_factor,
        force_upcast: vae.force_upcast,
        force_zeros_for_empty_prompt: index.force_zeros_for_empty_prompt,
        ..ModelConfig::default()
    })
}
