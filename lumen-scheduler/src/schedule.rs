use lumen_core::{LumenError, Result};

use crate::config::{BetaSchedule, SchedulerConfig, TimestepSpacing};

/// Training-time noise schedule: cumulative alphas and the equivalent
/// sigmas, one entry per training timestep.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    alphas_cumprod: Vec<f64>,
    sigmas: Vec<f64>,
}

impl NoiseSchedule {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let n = config.num_train_timesteps;
        if n < 2 {
            return Err(LumenError::ModelConfig(format!(
                "num_train_timesteps must be at least 2, got {n}"
            )));
        }
        let betas: Vec<f64> = match config.beta_schedule {
            BetaSchedule::Linear => linspace(config.beta_start, config.beta_end, n),
            BetaSchedule::ScaledLinear => {
                linspace(config.beta_start.sqrt(), config.beta_end.sqrt(), n)
                    .into_iter()
                    .map(|b| b * b)
                    .collect()
            }
        };
        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0;
        for beta in betas {
            acc *= 1.0 - beta;
            alphas_cumprod.push(acc);
        }
        let sigmas = alphas_cumprod
            .iter()
            .map(|&a| ((1.0 - a) / a).sqrt())
            .collect();
        Ok(Self {
            alphas_cumprod,
            sigmas,
        })
    }

    pub fn num_train_timesteps(&self) -> usize {
        self.alphas_cumprod.len()
    }

    pub fn alpha_cumprod(&self, t: usize) -> f64 {
        self.alphas_cumprod[t.min(self.alphas_cumprod.len() - 1)]
    }

    /// Sigma at a fractional timestep, linearly interpolated and clamped to
    /// the training range.
    pub fn sigma_at(&self, t: f64) -> f64 {
        let last = self.sigmas.len() - 1;
        if t <= 0.0 {
            return self.sigmas[0];
        }
        if t >= last as f64 {
            return self.sigmas[last];
        }
        let lo = t.floor() as usize;
        let frac = t - lo as f64;
        self.sigmas[lo] + (self.sigmas[lo + 1] - self.sigmas[lo]) * frac
    }

    /// Cumulative alpha equivalent to [`sigma_at`](Self::sigma_at).
    pub fn alpha_cumprod_at(&self, t: f64) -> f64 {
        let sigma = self.sigma_at(t);
        1.0 / (sigma * sigma + 1.0)
    }
}

pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Descending inference timesteps for `num_inference_steps`.
pub(crate) fn spaced_timesteps(
    config: &SchedulerConfig,
    num_inference_steps: usize,
) -> Result<Vec<f64>> {
    let train = config.num_train_timesteps;
    if num_inference_steps == 0 || num_inference_steps > train {
        return Err(LumenError::InvalidArgument(format!(
            "num_inference_steps must be in 1..={train}, got {num_inference_steps}"
        )));
    }
    let n = num_inference_steps;
    let timesteps = match config.timestep_spacing {
        TimestepSpacing::Linspace => {
            let mut ts = linspace(0.0, (train - 1) as f64, n);
            ts.reverse();
            ts
        }
        TimestepSpacing::Leading => {
            let ratio = train / n;
            (0..n)
                .rev()
                .map(|i| (i * ratio + config.steps_offset) as f64)
                .collect()
        }
        TimestepSpacing::Trailing => {
            let ratio = train as f64 / n as f64;
            (0..n)
                .map(|i| (train as f64 - i as f64 * ratio).round_ties_even() - 1.0)
                .collect()
        }
    };
    Ok(timesteps)
}

/// `max_sigma` for linspace and trailing spacing, `sqrt(max_sigma² + 1)`
/// for leading.
pub(crate) fn init_noise_sigma(spacing: TimestepSpacing, sigmas: &[f64]) -> f32 {
    let max_sigma = sigmas.iter().copied().fold(0.0_f64, f64::max);
    match spacing {
        TimestepSpacing::Linspace | TimestepSpacing::Trailing => max_sigma as f32,
        TimestepSpacing::Leading => (max_sigma * max_sigma + 1.0).sqrt() as f32,
    }
}

/// Position of `timestep` in a schedule.
pub(crate) fn index_for_timestep(timesteps: &[f64], timestep: f64) -> Result<usize> {
    timesteps
        .iter()
        .position(|&t| (t - timestep).abs() < 1e-6)
        .ok_or_else(|| {
            LumenError::InvalidArgument(format!("timestep {timestep} is not in the schedule"))
        })
}
