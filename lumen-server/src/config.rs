//! Command-line configuration and the state built from it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lumen_backend_cpu::CpuBackend;
use lumen_core::Result;
use lumen_loader::{load_pipeline_config, PipelineConfig};
use lumen_model_reference::load_reference_model;
use lumen_runtime::{LoopOptions, ParamLimits, Pipeline, Postprocessor};
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "lumen-server", about = "Lumen streaming diffusion preview server")]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Diffusers-style model directory; built-in SDXL defaults when absent
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Engine id reported to clients; defaults to the model name
    #[arg(long)]
    pub engine_id: Option<String>,

    /// Number of pipeline replicas, i.e. concurrent sessions
    #[arg(long, default_value = "1")]
    pub replicas: usize,

    /// Wall-clock limit per session, including time queued for a replica
    #[arg(long, default_value = "600")]
    pub session_timeout_secs: u64,

    /// Time allowed for the client to send its request
    #[arg(long, default_value = "30")]
    pub request_timeout_secs: u64,

    #[arg(long, default_value = "150")]
    pub max_steps: usize,

    #[arg(long, default_value = "2048")]
    pub max_dimension: usize,

    #[arg(long, default_value = "8")]
    pub max_samples: usize,

    /// Cap on positive prompts times samples, i.e. latent rows per session
    #[arg(long, default_value = "8")]
    pub max_batch: usize,

    /// Guidance rescale factor in [0, 1]; 0 disables
    #[arg(long, default_value = "0.0")]
    pub guidance_rescale: f32,

    /// Stop denoising after this fraction of the noise range, in (0, 1)
    #[arg(long)]
    pub denoising_end: Option<f64>,

    /// Previews are shrunk to fit this square
    #[arg(long, default_value = "256", value_parser = clap::value_parser!(u32).range(1..))]
    pub preview_size: u32,

    #[arg(long, default_value = "75", value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Stamp a provenance mark on decoded images
    #[arg(long)]
    pub watermark: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self::parse_from(["lumen-server"])
    }
}

/// Per-session settings shared by every connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub limits: ParamLimits,
    pub request_timeout: Duration,
    pub session_timeout: Duration,
    pub guidance_rescale: f32,
    pub denoising_end: Option<f64>,
    pub postprocess: Postprocessor,
}

impl Default for SessionConfig {
    fn default() -> Self {
        ServeArgs::default().session_config()
    }
}

impl SessionConfig {
    /// Loop options for one session; deadline and cancellation are filled
    /// in by the session.
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            guidance_rescale: self.guidance_rescale,
            denoising_end: self.denoising_end,
            postprocess: self.postprocess,
            ..Default::default()
        }
    }
}

impl ServeArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            limits: ParamLimits {
                max_steps: self.max_steps,
                max_dimension: self.max_dimension,
                max_samples: self.max_samples,
                max_batch: self.max_batch,
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            guidance_rescale: self.guidance_rescale.clamp(0.0, 1.0),
            denoising_end: self.denoising_end,
            postprocess: Postprocessor {
                preview_size: self.preview_size.max(1),
                jpeg_quality: self.jpeg_quality.clamp(1, 100),
            },
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        match &self.model_path {
            Some(path) => load_pipeline_config(path),
            None => {
                info!("no model path given, using built-in SDXL config");
                Ok(PipelineConfig::default())
            }
        }
    }
}

/// Build `replicas` reference pipelines on the CPU backend.
pub fn reference_pipelines(
    config: &PipelineConfig,
    replicas: usize,
    watermark: bool,
) -> Result<Vec<Pipeline<CpuBackend>>> {
    (0..replicas.max(1))
        .map(|_| {
            let backend = CpuBackend::new();
            let reference =
                load_reference_model(backend.clone(), &config.model, &config.scheduler, watermark)?;
            Ok(Pipeline::new(
                backend,
                config.model.clone(),
                config.scheduler.clone(),
                Box::new(reference.conditioner),
                Box::new(reference.denoiser),
                Box::new(reference.decoder),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let session = ServeArgs::default().session_config();
        assert_eq!(session.limits.max_batch, 8);
        assert_eq!(session.postprocess.preview_size, 256);
        assert_eq!(session.session_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_zero_preview_size_rejected() {
        assert!(ServeArgs::try_parse_from(["lumen-server", "--preview-size", "0"]).is_err());
        assert!(ServeArgs::try_parse_from(["lumen-server", "--jpeg-quality", "0"]).is_err());
        let args = ServeArgs::try_parse_from(["lumen-server", "--preview-size", "64"]).unwrap();
        assert_eq!(args.session_config().postprocess.preview_size, 64);
    }

    #[test]
    fn test_max_batch_flag() {
        let args = ServeArgs::try_parse_from(["lumen-server", "--max-batch", "2"]).unwrap();
        assert_eq!(args.session_config().limits.max_batch, 2);
    }
}
