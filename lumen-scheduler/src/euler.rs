use lumen_core::{Backend, LumenError, NoiseScheduler, Result};

use crate::config::SchedulerConfig;
use crate::schedule::{self, NoiseSchedule};

/// First-order Euler solver over sigmas interpolated from the training
/// schedule. Default for SDXL.
#[derive(Debug, Clone)]
pub struct EulerDiscreteScheduler {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<f64>,
    /// One more entry than `timesteps`; the last is 0.
    sigmas: Vec<f64>,
    init_noise_sigma: f32,
    step_index: Option<usize>,
}

impl EulerDiscreteScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let schedule = NoiseSchedule::new(&config)?;
        Ok(Self {
            config,
            schedule,
            timesteps: Vec::new(),
            sigmas: Vec::new(),
            init_noise_sigma: 1.0,
            step_index: None,
        })
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    fn current_index(&mut self, timestep: f64) -> Result<usize> {
        match self.step_index {
            Some(idx) => Ok(idx),
            None => {
                let idx = schedule::index_for_timestep(&self.timesteps, timestep)?;
                self.step_index = Some(idx);
                Ok(idx)
            }
        }
    }
}

impl<B: Backend> NoiseScheduler<B> for EulerDiscreteScheduler {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let timesteps = schedule::spaced_timesteps(&self.config, num_inference_steps)?;
        let mut sigmas: Vec<f64> = timesteps
            .iter()
            .map(|&t| self.schedule.sigma_at(t))
            .collect();
        sigmas.push(0.0);
        self.init_noise_sigma = schedule::init_noise_sigma(self.config.timestep_spacing, &sigmas);
        self.timesteps = timesteps;
        self.sigmas = sigmas;
        self.step_index = None;
        Ok(())
    }

    fn timesteps(&self) -> &[f64] {
        &self.timesteps
    }

    fn order(&self) -> usize {
        1
    }

    fn init_noise_sigma(&self) -> f32 {
        self.init_noise_sigma
    }

    fn num_train_timesteps(&self) -> usize {
        self.config.num_train_timesteps
    }

    fn scale_model_input(
        &mut self,
        backend: &B,
        sample: &B::Tensor,
        timestep: f64,
    ) -> Result<B::Tensor> {
        let idx = self.current_index(timestep)?;
        let sigma = self.sigmas[idx];
        backend.mul_scalar(sample, (1.0 / (sigma * sigma + 1.0).sqrt()) as f32)
    }

    fn step(
        &mut self,
        backend: &B,
        noise_pred: &B::Tensor,
        timestep: f64,
        sample: &B::Tensor,
    ) -> Result<B::Tensor> {
        let idx = self.current_index(timestep)?;
        if idx + 1 >= self.sigmas.len() {
            return Err(LumenError::InvalidArgument(
                "step called after the final timestep".into(),
            ));
        }
        // With epsilon prediction the ODE derivative is the predicted noise.
        let dt = self.sigmas[idx + 1] - self.sigmas[idx];
        let prev = backend.axpby(1.0, sample, dt as f32, noise_pred)?;
        self.step_index = Some(idx + 1);
        Ok(prev)
    }
}
