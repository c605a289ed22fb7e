use std::path::Path;

use lumen_core::{LumenError, ModelConfig, Result};
use lumen_scheduler::SchedulerConfig;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{self, ModelIndex, UnetConfig, VaeConfig};

/// Everything a pipeline needs to know about its model directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub scheduler: SchedulerConfig,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| LumenError::ModelConfig(format!("{}: {e}", path.display())))
}

/// Like [`read_json`], but a missing file yields `None`.
fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "config file absent, using defaults");
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Load the pipeline configuration from a diffusers-style directory.
///
/// `scheduler/scheduler_config.json` is required; `model_index.json`,
/// `unet/config.json` and `vae/config.json` fall back to SDXL defaults.
pub fn load_pipeline_config(dir: &Path) -> Result<PipelineConfig> {
    if !dir.is_dir() {
        return Err(LumenError::ModelConfig(format!(
            "model path {} is not a directory",
            dir.display()
        )));
    }

    let scheduler: SchedulerConfig = read_json(&dir.join("scheduler").join("scheduler_config.json"))?;
    let index: ModelIndex = read_optional(&dir.join("model_index.json"))?.unwrap_or_default();
    let unet: UnetConfig = match read_optional(&dir.join("unet").join("config.json"))? {
        Some(unet) => unet,
        None => serde_json::from_str("{}")?,
    };
    let vae: VaeConfig = match read_optional(&dir.join("vae").join("config.json"))? {
        Some(vae) => vae,
        None => serde_json::from_str("{}")?,
    };

    let name = index
        .name_or_path
        .clone()
        .or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ModelConfig::default().name);
    let model = config::to_model_config(name, &index, &unet, &vae)?;

    info!(
        model = %model.name,
        scheduler = ?scheduler.kind,
        vae_scale_factor = model.vae_scale_factor,
        "loaded pipeline config"
    );
    Ok(PipelineConfig { model, scheduler })
}
