use crate::backend::Backend;
use crate::Result;

/// A noise scheduler: the fixed numeric rule that walks latents from noise
/// toward a sample along a discretised timestep schedule.
///
/// Schedulers are stateful per run (step index, multistep history), so a
/// fresh instance is built for every session.
pub trait NoiseScheduler<B: Backend>: Send {
    /// Compute the timestep schedule for `num_inference_steps`.
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()>;

    /// Descending timesteps. May be longer than the requested step count for
    /// multi-stage solvers.
    fn timesteps(&self) -> &[f64];

    /// Number of schedule entries that make up one solver step.
    fn order(&self) -> usize;

    fn init_noise_sigma(&self) -> f32;

    fn num_train_timesteps(&self) -> usize;

    /// Scale the denoising model input for the current timestep.
    fn scale_model_input(
        &mut self,
        backend: &B,
        sample: &B::Tensor,
        timestep: f64,
    ) -> Result<B::Tensor>;

    /// Advance `sample` by one schedule entry given the predicted noise.
    fn step(
        &mut self,
        backend: &B,
        noise_pred: &B::Tensor,
        timestep: f64,
        sample: &B::Tensor,
    ) -> Result<B::Tensor>;
}
