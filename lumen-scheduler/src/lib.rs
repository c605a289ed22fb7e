//! Lumen scheduler: discretised noise schedules and the update rules that
//! walk latents along them.

pub mod config;
pub mod ddim;
pub mod euler;
pub mod heun;
pub mod schedule;

pub use config::{BetaSchedule, SchedulerConfig, SchedulerKind, TimestepSpacing};
pub use ddim::DdimScheduler;
pub use euler::EulerDiscreteScheduler;
pub use heun::HeunDiscreteScheduler;
pub use schedule::NoiseSchedule;

use lumen_core::{Backend, LumenError, NoiseScheduler, Result};

/// Build a fresh scheduler instance for one run.
pub fn build_scheduler<B: Backend>(
    config: &SchedulerConfig,
) -> Result<Box<dyn NoiseScheduler<B>>> {
    if config.prediction_type != "epsilon" {
        return Err(LumenError::ModelConfig(format!(
            "unsupported prediction type: {}",
            config.prediction_type
        )));
    }
    Ok(match config.kind {
        SchedulerKind::EulerDiscrete => Box::new(EulerDiscreteScheduler::new(config.clone())?),
        SchedulerKind::HeunDiscrete => Box::new(HeunDiscreteScheduler::<B>::new(config.clone())?),
        SchedulerKind::Ddim => Box::new(DdimScheduler::new(config.clone())?),
    })
}
