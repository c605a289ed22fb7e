use lumen_core::{Backend, LumenError, NoiseScheduler, Result};

use crate::config::SchedulerConfig;
use crate::schedule::{self, NoiseSchedule};

/// Deterministic DDIM (`eta = 0`).
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<f64>,
    num_inference_steps: usize,
    final_alpha_cumprod: f64,
}

impl DdimScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let schedule = NoiseSchedule::new(&config)?;
        let final_alpha_cumprod = if config.set_alpha_to_one {
            1.0
        } else {
            schedule.alpha_cumprod(0)
        };
        Ok(Self {
            config,
            schedule,
            timesteps: Vec::new(),
            num_inference_steps: 0,
            final_alpha_cumprod,
        })
    }

    /// Coefficients `(a, b)` with `prev = a * sample + b * eps`.
    pub fn coefficients(&self, timestep: f64) -> Result<(f64, f64)> {
        if self.num_inference_steps == 0 {
            return Err(LumenError::InvalidArgument(
                "set_timesteps must be called before step".into(),
            ));
        }
        let train = self.config.num_train_timesteps;
        if !(0.0..train as f64).contains(&timestep) {
            return Err(LumenError::InvalidArgument(format!(
                "timestep {timestep} outside 0..{train}"
            )));
        }
        let t = timestep.round() as i64;
        let prev_t = t - (train / self.num_inference_steps) as i64;
        let alpha_t = self.schedule.alpha_cumprod(t as usize);
        let alpha_prev = if prev_t >= 0 {
            self.schedule.alpha_cumprod(prev_t as usize)
        } else {
            self.final_alpha_cumprod
        };
        let a = alpha_prev.sqrt() / alpha_t.sqrt();
        let b = (1.0 - alpha_prev).sqrt() - alpha_prev.sqrt() * (1.0 - alpha_t).sqrt() / alpha_t.sqrt();
        Ok((a, b))
    }
}

impl<B: Backend> NoiseScheduler<B> for DdimScheduler {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        self.timesteps = schedule::spaced_timesteps(&self.config, num_inference_steps)?
            .into_iter()
            .map(f64::round)
            .collect();
        self.num_inference_steps = num_inference_steps;
        Ok(())
    }

    fn timesteps(&self) -> &[f64] {
        &self.timesteps
    }

    fn order(&self) -> usize {
        1
    }

    fn init_noise_sigma(&self) -> f32 {
        1.0
    }

    fn num_train_timesteps(&self) -> usize {
        self.config.num_train_timesteps
    }

    fn scale_model_input(
        &mut self,
        _backend: &B,
        sample: &B::Tensor,
        _timestep: f64,
    ) -> Result<B::Tensor> {
        Ok(sample.clone())
    }

    fn step(
        &mut self,
        backend: &B,
        noise_pred: &B::Tensor,
        timestep: f64,
        sample: &B::Tensor,
    ) -> Result<B::Tensor> {
        let (a, b) = self.coefficients(timestep)?;
        backend.axpby(a as f32, sample, b as f32, noise_pred)
    }
}
