//! Lumen reference model family.
//!
//! Closed-form stand-ins for the text encoder, noise predictor and latent
//! decoder. Outputs are deterministic functions of the inputs, so whole
//! sessions can run and be compared bit-for-bit without model weights.

pub mod conditioner;
pub mod decoder;
pub mod denoiser;
pub mod loader;

pub use conditioner::HashConditioner;
pub use decoder::LinearLatentDecoder;
pub use denoiser::AnalyticDenoiser;
pub use loader::{load_reference_model, ReferenceModel};
