//! Lumen loader: pipeline configuration parsing from diffusers-style
//! model directories.

pub mod config;
pub mod directory;

pub use config::{ModelIndex, UnetConfig, VaeConfig};
pub use directory::{load_pipeline_config, PipelineConfig};
