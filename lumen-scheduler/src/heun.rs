use lumen_core::{Backend, LumenError, NoiseScheduler, Result};

use crate::config::SchedulerConfig;
use crate::schedule::{self, NoiseSchedule};

/// Second-order Heun solver. Every solver step after the first spans two
/// schedule entries: an Euler predictor followed by a trapezoidal corrector
/// at the same timestep.
pub struct HeunDiscreteScheduler<B: Backend> {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<f64>,
    /// `[s0, s1, s1, .., s(n-1), s(n-1), 0]`.
    sigmas: Vec<f64>,
    init_noise_sigma: f32,
    step_index: Option<usize>,
    /// Predictor state carried into the corrector.
    prev_derivative: Option<B::Tensor>,
    dt: Option<f64>,
    sample: Option<B::Tensor>,
}

impl<B: Backend> HeunDiscreteScheduler<B> {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let schedule = NoiseSchedule::new(&config)?;
        Ok(Self {
            config,
            schedule,
            timesteps: Vec::new(),
            sigmas: Vec::new(),
            init_noise_sigma: 1.0,
            step_index: None,
            prev_derivative: None,
            dt: None,
            sample: None,
        })
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    fn state_in_first_order(&self) -> bool {
        self.dt.is_none()
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

impl<B: Backend> NoiseScheduler<B> for HeunDiscreteScheduler<B> {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let base = schedule::spaced_timesteps(&self.config, num_inference_steps)?;
        let base_sigmas: Vec<f64> = base.iter().map(|&t| self.schedule.sigma_at(t)).collect();

        let mut sigmas = Vec::with_capacity(2 * base.len());
        sigmas.push(base_sigmas[0]);
        for &s in &base_sigmas[1..] {
            sigmas.push(s);
            sigmas.push(s);
        }
        sigmas.push(0.0);

        let mut timesteps = Vec::with_capacity(2 * base.len() - 1);
        timesteps.push(base[0]);
        for &t in &base[1..] {
            timesteps.push(t);
            timesteps.push(t);
        }

        self.init_noise_sigma = schedule::init_noise_sigma(self.config.timestep_spacing, &sigmas);
        self.timesteps = timesteps;
        self.sigmas = sigmas;
        self.step_index = None;
        self.prev_derivative = None;
        self.dt = None;
        self.sample = None;
        Ok(())
    }

    fn timesteps(&self) -> &[f64] {
        &self.timesteps
    }

    fn order(&self) -> usize {
        2
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

        let prev = if self.state_in_first_order() {
            let dt = self.sigmas[idx + 1] - self.sigmas[idx];
            let prev = backend.axpby(1.0, sample, dt as f32, noise_pred)?;
            self.prev_derivative = Some(noise_pred.clone());
            self.dt = Some(dt);
            self.sample = Some(sample.clone());
            prev
        } else {
            let (Some(prev_derivative), Some(dt), Some(origin)) =
                (self.prev_derivative.take(), self.dt.take(), self.sample.take())
            else {
                return Err(LumenError::Internal("heun corrector without predictor".into()));
            };
            let half_dt = (0.5 * dt) as f32;
            let delta = backend.axpby(half_dt, &prev_derivative, half_dt, noise_pred)?;
            backend.add(&origin, &delta)?
        };

        self.step_index = Some(idx + 1);
        Ok(prev)
    }
}
