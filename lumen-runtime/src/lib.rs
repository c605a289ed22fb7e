//! Lumen runtime: the denoising loop and the policies it applies.

pub mod cadence;
pub mod decode;
pub mod denoise;
pub mod guidance;
pub mod params;
pub mod pipeline;
pub mod pool;

pub use cadence::{CadencePolicy, StepAction};
pub use decode::{Postprocessor, UpcastGuard};
pub use denoise::{DenoiseLoop, LoopEvent, LoopOptions, LoopReport, LoopState};
pub use guidance::GuidanceCombiner;
pub use params::{resolve, ParamLimits, ResolvedParams};
pub use pipeline::Pipeline;
pub use pool::{PipelinePool, PoolGuard};
