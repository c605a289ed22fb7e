//! Lumen core types, traits, and error definitions.

pub mod backend;
pub mod error;
pub mod oracle;
pub mod request;
pub mod scheduler;
pub mod tensor;
pub mod types;
pub mod update;

pub use backend::Backend;
pub use error::{LumenError, Result};
pub use oracle::{Conditioning, LatentDecoder, NoiseInput, NoiseOracle, TextConditioner};
pub use request::{GenerationRequest, TextPrompt};
pub use scheduler::NoiseScheduler;
pub use tensor::Tensor;
pub use types::*;
pub use update::{Artifact, StepUpdate};
